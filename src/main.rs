//! SAOL3D session runner.
//!
//! ```text
//! saol3d [--config <file.toml>]
//! saol3d [--config <file.toml>] gen-order <out.tsv> <n_trials> [seed]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use saol_experiment::{AssetResolver, OrderSpec, OrderTable, SessionConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod sim;

use app::App;

const APP_ID: &str = "saol3d";

struct Args {
    config: Option<PathBuf>,
    command: Vec<String>,
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut config = None;
    let mut command = Vec::new();
    let mut raw = raw.into_iter();
    while let Some(arg) = raw.next() {
        if arg == "--config" {
            let path = raw.next().context("--config needs a path")?;
            config = Some(PathBuf::from(path));
        } else {
            command.push(arg);
        }
    }
    Ok(Args { config, command })
}

fn data_dir(config: &SessionConfig) -> PathBuf {
    config
        .recording
        .data_dir
        .clone()
        .or_else(|| dirs_next::data_dir().map(|p| p.join(APP_ID)))
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn init_logging(data_dir: &Path) -> WorkerGuard {
    let file = tracing_appender::rolling::daily(data_dir.join("logs"), "saol3d.log");
    let (writer, guard) = tracing_appender::non_blocking(file);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,saol=debug")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    guard
}

/// Draw a random order table from the images in the stimulus directory.
fn gen_order(config: &SessionConfig, args: &[String]) -> Result<()> {
    let (out, n_trials, seed) = match args {
        [out, n] => (out, n, None),
        [out, n, seed] => (out, n, Some(seed)),
        _ => bail!("usage: saol3d gen-order <out.tsv> <n_trials> [seed]"),
    };
    let out = Path::new(out);
    if out.exists() {
        bail!("{} already exists", out.display());
    }
    let n_trials: u32 = n_trials
        .parse()
        .with_context(|| format!("invalid trial count '{n_trials}'"))?;
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(
            seed.parse()
                .with_context(|| format!("invalid seed '{seed}'"))?,
        ),
        None => StdRng::from_os_rng(),
    };

    let assets = AssetResolver::new(&config.assets.stimuli_dir, &config.assets.extension);
    let pool = assets.list_stimuli()?;
    let spec = OrderSpec {
        n_trials,
        ..OrderSpec::default()
    };
    let table = OrderTable::generate(&mut rng, &pool, &spec)?;
    table.write_tsv(out)?;
    tracing::info!(
        "Wrote {} trials x {} arms to {} from {} stimuli",
        table.n_trials(),
        table.n_arms(),
        out.display(),
        pool.len()
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    let config = match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => SessionConfig::default(),
    };

    let data_dir = data_dir(&config);
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
    let _guard = init_logging(&data_dir);
    tracing::info!("Starting SAOL3D ({})", env!("CARGO_PKG_VERSION"));

    match args.command.first().map(String::as_str) {
        None => App::new(config, data_dir)?.run(),
        Some("gen-order") => gen_order(&config, &args.command[1..]),
        Some(other) => bail!("unknown command '{other}'"),
    }
}
