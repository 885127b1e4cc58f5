// alert-sim
//
// Stands in for the detection engine: accepts dashboard connections and
// broadcasts synthetic fraud alerts to all of them.

use clap::Parser;
use crossbeam::channel;
use sentinel::feed::proto;
use sentinel_tools::logging::{self, LogTarget};
use sentinel_tools::sim;

use rand::Rng;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "alert-sim",
    version,
    about = "Serve synthetic fraud alerts in place of the detection engine"
)]
struct Cli {
    /// Address to listen on
    #[arg(short = 'l', long = "listen", default_value = "127.0.0.1:5000")]
    listen: SocketAddr,

    /// Shortest pause between batches, in milliseconds
    #[arg(long = "min-interval-ms", default_value_t = 2000)]
    min_interval_ms: u64,

    /// Longest pause between batches, in milliseconds
    #[arg(long = "max-interval-ms", default_value_t = 5000)]
    max_interval_ms: u64,

    /// Pause between alerts of a burst, in milliseconds
    #[arg(long = "burst-interval-ms", default_value_t = 500)]
    burst_interval_ms: u64,

    /// Event name to publish alerts under
    #[arg(long, default_value = proto::DEFAULT_ALERT_EVENT)]
    event: String,

    /// Send an invalid alert after every N valid ones
    #[arg(long = "malformed-every")]
    malformed_every: Option<u64>,

    /// Stop after this many alerts
    #[arg(short = 'n', long = "count")]
    count: Option<u64>,

    /// Log filter (e.g., info, debug)
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,
}

fn create_listener_thread(
    addr: SocketAddr,
    client_send: channel::Sender<TcpStream>,
) -> io::Result<()> {
    let listener = TcpListener::bind(addr)?;
    std::thread::Builder::new()
        .name("listener".to_string())
        .spawn(move || {
            for res in listener.incoming() {
                match res {
                    Ok(stream) => {
                        if client_send.send(stream).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!("error accepting client: {}", err),
                };
            }
        })?;
    Ok(())
}

struct Client {
    addr: String,
    stream: TcpStream,
}

/// Writes `frame` to every client, dropping those that fail.
fn broadcast(clients: &mut Vec<Client>, frame: &str) {
    clients.retain_mut(|client| match client.stream.write_all(frame.as_bytes()) {
        Ok(()) => true,
        Err(err) => {
            info!("client {} disconnected: {}", client.addr, err);
            false
        }
    });
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init_logging(&cli.log_level, LogTarget::Stderr) {
        eprintln!("alert-sim: {}", e);
        return ExitCode::FAILURE;
    }

    let (client_send, new_client) = channel::bounded::<TcpStream>(16);
    if let Err(err) = create_listener_thread(cli.listen, client_send) {
        error!("failed to listen on {}: {}", cli.listen, err);
        return ExitCode::FAILURE;
    }
    info!("serving alerts on {} as `{}`", cli.listen, cli.event);

    let min_interval = cli.min_interval_ms.min(cli.max_interval_ms);
    let mut rng = rand::thread_rng();
    let mut clients: Vec<Client> = Vec::new();
    let mut pending: usize = 0;
    let mut sent: u64 = 0;
    let mut next = channel::after(Duration::from_millis(
        rng.gen_range(min_interval..=cli.max_interval_ms),
    ));

    use crossbeam::select;
    'main: loop {
        select! {
            recv(new_client) -> tcp_client => {
                let Ok(stream) = tcp_client else { break 'main };
                let addr = match stream.peer_addr() {
                    Ok(addr) => addr.to_string(),
                    Err(err) => {
                        warn!("failed to determine client address: {}", err);
                        continue;
                    }
                };
                if let Err(err) = stream.set_write_timeout(Some(Duration::from_secs(1))) {
                    warn!("client {}: {}", addr, err);
                }
                let _ = stream.set_nodelay(true);
                info!("accepted client from {}", addr);
                clients.push(Client { addr, stream });
            }

            recv(next) -> _ => {
                if pending == 0 {
                    pending = sim::batch_size(&mut rng);
                    if pending > 1 {
                        debug!("burst of {} alerts", pending);
                    }
                }
                let alert = sim::synthetic_alert(&mut rng);
                match proto::encode_alert(&cli.event, &alert) {
                    Ok(frame) => broadcast(&mut clients, &frame),
                    Err(err) => warn!("cannot encode alert {}: {}", alert.transaction_id, err),
                }
                sent += 1;
                info!(
                    clients = clients.len(),
                    "{} {} {} ({})",
                    alert.transaction_id,
                    alert.status.as_deref().unwrap_or("-"),
                    alert.description,
                    alert.score
                );
                if cli.malformed_every.is_some_and(|n| n > 0 && sent % n == 0) {
                    broadcast(&mut clients, &sim::malformed_frame(&cli.event));
                    debug!("sent malformed alert");
                }
                if cli.count.is_some_and(|n| sent >= n) {
                    break 'main;
                }

                pending -= 1;
                let delay = if pending > 0 {
                    cli.burst_interval_ms
                } else {
                    rng.gen_range(min_interval..=cli.max_interval_ms)
                };
                next = channel::after(Duration::from_millis(delay));
            }
        }
    }

    info!("sent {} alerts", sent);
    ExitCode::SUCCESS
}
