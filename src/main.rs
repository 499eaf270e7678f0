//! resilient-cam: hot-plug resilient cameras on a simulated backend.

mod cli;

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use cli::{Args, Command};

static CTRLC_RECEIVED: AtomicBool = AtomicBool::new(false);

/// Writes records to stderr so stdout stays free for scenario output.
struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        eprintln!(
            "[{:<5}] [thread:{}] {}:{} - {}",
            record.level(),
            std::thread::current().name().unwrap_or("?"),
            record.file().unwrap_or("unknown"),
            record.line().unwrap_or(0),
            record.args()
        );
    }

    fn flush(&self) {
        std::io::stderr().flush().ok();
    }
}

/// Install the stderr logger. Later calls are ignored.
fn init_logging(verbose: bool) {
    static LOGGER: StderrLogger = StderrLogger;

    let max_level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(max_level);
    }
}

fn setup_ctrlc_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        CTRLC_RECEIVED.store(true, Ordering::SeqCst);
        eprintln!("\nReceived Ctrl+C, shutting down...");
    })
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match cli::load_config(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = setup_ctrlc_handler() {
        eprintln!("Warning: Could not install Ctrl+C handler: {}", e);
    }

    let result = match args.command {
        Command::Webcam {
            serial,
            seconds,
            unplug_every,
        } => cli::run_webcam(config, &serial, seconds, unplug_every, &CTRLC_RECEIVED),
        Command::Switchable {
            members,
            seconds,
            switch_every,
        } => cli::run_switchable(config, members, seconds, switch_every, &CTRLC_RECEIVED),
        Command::Config { action } => {
            cli::handle_config_action(action, &config, args.config.as_deref())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
