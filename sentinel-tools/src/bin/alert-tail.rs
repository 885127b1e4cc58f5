// alert-tail
//
// Prints every validated alert from the engine as one line on stdout.
// Connection and validation problems go to the log on stderr.

use chrono::Local;
use clap::Parser;
use sentinel::feed::{AlertEvent, ConnectionManager, Event};
use sentinel::AlertBuffer;
use sentinel_tools::logging::{self, LogTarget};
use sentinel_tools::EngineOpts;

use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(
    name = "alert-tail",
    version,
    about = "Print fraud alerts from the detection engine as they arrive"
)]
struct Cli {
    #[command(flatten)]
    engine: EngineOpts,

    /// Print alerts as JSON objects instead of text
    #[arg(long)]
    json: bool,

    /// Exit after this many alerts
    #[arg(short = 'n', long = "count")]
    count: Option<u64>,
}

fn format_text(alert: &AlertEvent) -> String {
    format!(
        "{} {:<18} {:<24} {:>6}  {:<12} {}",
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        alert.transaction_id,
        alert.kind,
        alert.score.to_string(),
        alert.status.as_deref().unwrap_or("-"),
        alert.description
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.engine.load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("alert-tail: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init_logging(
        &config.logging.level,
        LogTarget::for_stream(config.logging.file.clone()),
    ) {
        eprintln!("alert-tail: {}", e);
        return ExitCode::FAILURE;
    }

    let mut connection = match ConnectionManager::open(&config.engine.url, config.connect_options()) {
        Ok(connection) => connection,
        Err(e) => {
            eprintln!("alert-tail: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut buffer = AlertBuffer::new(config.feed.capacity);
    let mut stdout = io::stdout().lock();
    let mut printed = 0u64;
    let mut write_failed = false;

    while connection.is_active() && !write_failed {
        if cli.count.is_some_and(|n| printed >= n) {
            break;
        }
        connection.dispatch_with(&mut buffer, Some(Duration::from_millis(250)), |ev| {
            let Event::Alert(alert) = ev else {
                return;
            };
            if write_failed || cli.count.is_some_and(|n| printed >= n) {
                return;
            }
            let line = if cli.json {
                match serde_json::to_string(alert) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("cannot encode alert {}: {}", alert.transaction_id, e);
                        return;
                    }
                }
            } else {
                format_text(alert)
            };
            // Broken pipe: the reader went away.
            if writeln!(stdout, "{}", line).and_then(|_| stdout.flush()).is_err() {
                write_failed = true;
                return;
            }
            printed += 1;
        });
    }

    let gave_up = !connection.is_active();
    connection.close();
    if gave_up {
        eprintln!("alert-tail: engine at {} unreachable, giving up", config.engine.url);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
