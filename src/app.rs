use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{Receiver, TryRecvError};
use saol_core::Collaborators;
use saol_experiment::{CommandDispatcher, Pcrm, SessionConfig, SessionController};
use saol_timing::{Clock, MonotonicClock};
use tracing::{error, info, warn};

use crate::sim::{FsStimulusDisplay, LogOverlay, SimPlayer};

/// Terminal frontend: ticks the controller at a fixed rate and feeds it
/// operator commands read from stdin.
pub struct App {
    controller: SessionController<Pcrm, MonotonicClock>,
    console: CommandDispatcher,
    clock: MonotonicClock,
    frame: Duration,
    stdin_closed: bool,
    should_exit: bool,
}

impl App {
    pub fn new(config: SessionConfig, data_dir: PathBuf) -> Result<Self> {
        let frame = Duration::from_secs_f64(1.0 / config.recording.tick_hz);
        let io = Collaborators::new(
            Box::new(SimPlayer::new()),
            Box::new(FsStimulusDisplay::default()),
            Box::new(LogOverlay),
        );
        let clock = MonotonicClock::new();
        let protocol = Pcrm::new(&config);
        let controller = SessionController::new(config, protocol, io, clock.clone());

        Ok(Self {
            controller,
            console: CommandDispatcher::new(data_dir),
            clock,
            frame,
            stdin_closed: false,
            should_exit: false,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let commands = spawn_stdin_reader()?;
        info!("Platform: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
        info!(
            "Ticking at {:.1} Hz, saving to {}",
            1.0 / self.frame.as_secs_f64(),
            self.console.data_dir().display()
        );
        println!("SAOL3D research console. Type 'help' for commands.");

        while !self.should_exit {
            let frame_start = self.clock.now();
            self.drain_commands(&commands);
            self.controller.tick();

            if self.stdin_closed && !self.controller.mode().is_running() {
                self.should_exit = true;
            }

            let spent = self.clock.elapsed(frame_start);
            if let Some(rest) = self.frame.checked_sub(spent) {
                self.clock.sleep(rest);
            }
            let total = self.clock.elapsed(frame_start);
            self.clock.record_frame(total);
        }

        self.cleanup_and_exit()
    }

    fn drain_commands(&mut self, commands: &Receiver<String>) {
        loop {
            match commands.try_recv() {
                Ok(line) => self.handle_input(&line),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.stdin_closed {
                        info!("Command input closed; exiting once no session is running");
                    }
                    self.stdin_closed = true;
                    break;
                }
            }
        }
    }

    fn handle_input(&mut self, line: &str) {
        let reply = self.console.handle(&mut self.controller, line);
        println!("{}", reply.text());
        if reply.is_quit() {
            self.should_exit = true;
        }
    }

    /// Stop a running session and persist anything recorded since the last
    /// save, whether or not the session is still running.
    fn cleanup_and_exit(mut self) -> Result<()> {
        let stats = self.clock.tick_stats();
        info!(
            "Tick timing: {:.3} ms/frame, {:.1} Hz, jitter {:.3} ms, max {:.3} ms",
            stats.average_frame_time_ns / 1e6,
            stats.effective_fps,
            stats.jitter_ns / 1e6,
            stats.max_frame_time_ns / 1e6,
        );

        match self.console.shutdown(&mut self.controller) {
            Ok(Some(report)) => {
                println!("Saved unsaved data to '{}'", report.positions.display());
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                error!("Could not save session data: {}", e);
                Err(e.into())
            }
        }
    }
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to read command: {}", e);
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}
