use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use saol_core::{Result, ResultExt, SaolError};
use tracing::debug;

type Formatter<T> = Box<dyn Fn(&T) -> String + Send + Sync>;

/// On-disk encoding, chosen by file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Appended as UTF-8 text.
    Plain,
    /// Streamed through gzip; replaces the target atomically.
    Gzip,
}

impl Encoding {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Encoding::Gzip,
            _ => Encoding::Plain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteStats {
    pub rows: usize,
    pub bytes: usize,
    pub encoding: Encoding,
}

/// Ordered row buffer with a pluggable line formatter.
///
/// Records are kept as values and only formatted on [`TableWriter::write`],
/// so the buffer stays inspectable and appending costs no allocation beyond
/// the record itself.
pub struct TableWriter<T> {
    headers: Option<Vec<String>>,
    ncol: usize,
    formatter: Formatter<T>,
    delim: String,
    newline: String,
    rows: Vec<T>,
}

impl<T> TableWriter<T> {
    /// Table with a header row. The header determines the column count.
    pub fn with_headers<I, S, F>(headers: I, formatter: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        let headers: Vec<String> = headers.into_iter().map(Into::into).collect();
        Self {
            ncol: headers.len(),
            headers: Some(headers),
            formatter: Box::new(formatter),
            delim: "\t".to_string(),
            newline: "\n".to_string(),
            rows: Vec::new(),
        }
    }

    /// Headerless table of `ncol` columns.
    pub fn with_columns<F>(ncol: usize, formatter: F) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        Self {
            headers: None,
            ncol,
            formatter: Box::new(formatter),
            delim: "\t".to_string(),
            newline: "\n".to_string(),
            rows: Vec::new(),
        }
    }

    pub fn delimiter(mut self, delim: impl Into<String>) -> Self {
        self.delim = delim.into();
        self
    }

    pub fn newline(mut self, newline: impl Into<String>) -> Self {
        self.newline = newline.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.rows.reserve(capacity);
        self
    }

    pub fn headers(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }

    pub fn ncol(&self) -> usize {
        self.ncol
    }

    pub fn append(&mut self, item: T) -> &mut Self {
        self.rows.push(item);
        self
    }

    pub fn extend<I: IntoIterator<Item = T>>(&mut self, items: I) -> &mut Self {
        self.rows.extend(items);
        self
    }

    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    pub fn last(&self) -> Option<&T> {
        self.rows.last()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.rows.capacity()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Render header and rows. Every line is terminated by the newline string.
    pub fn render(&self) -> Result<String> {
        let mut out = String::new();
        if let Some(headers) = &self.headers {
            out.push_str(&headers.join(&self.delim));
            out.push_str(&self.newline);
        }
        for (i, row) in self.rows.iter().enumerate() {
            let line = (self.formatter)(row);
            let fields = line.split(self.delim.as_str()).count();
            if fields != self.ncol {
                return Err(SaolError::Validation(format!(
                    "row {} has {} fields, expected {}",
                    i, fields, self.ncol
                )));
            }
            out.push_str(&line);
            out.push_str(&self.newline);
        }
        Ok(out)
    }

    /// Persist every buffered row. `.gz` targets are replaced through a
    /// `.part` sibling; anything else is appended. The buffer is left intact.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<WriteStats> {
        let path = path.as_ref();
        let encoding = Encoding::for_path(path);
        let text = self.render()?;

        match encoding {
            Encoding::Gzip => {
                let part = part_path(path);
                let result = write_gzip(&part, text.as_bytes()).and_then(|_| {
                    fs::rename(&part, path)
                        .with_context(|| format!("Failed to move {} into place", part.display()))
                });
                if result.is_err() {
                    let _ = fs::remove_file(&part);
                }
                result?;
            }
            Encoding::Plain => {
                let mut file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                file.write_all(text.as_bytes())
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
        }

        debug!(
            "Wrote {} rows ({} bytes, {:?}) to {}",
            self.rows.len(),
            text.len(),
            encoding,
            path.display()
        );
        Ok(WriteStats {
            rows: self.rows.len(),
            bytes: text.len(),
            encoding,
        })
    }
}

impl<T> std::fmt::Debug for TableWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableWriter")
            .field("headers", &self.headers)
            .field("ncol", &self.ncol)
            .field("rows", &self.rows.len())
            .finish()
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn write_gzip(path: &Path, bytes: &[u8]) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder
        .write_all(bytes)
        .with_context(|| format!("Failed to compress into {}", path.display()))?;
    let file = encoder
        .finish()
        .with_context(|| format!("Failed to finish {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync {}", path.display()))?;
    Ok(())
}
