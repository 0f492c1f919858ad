//! Line echo server running on the prefork pool.
//!
//! Every accepted connection gets its lines echoed back, prefixed with the
//! pid of the worker that served it. `SIGHUP` reloads configuration from the
//! environment and restarts the pool on the same listening socket.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};

use tracing::{debug, info, warn};

use prefork::config::{env_or, Config};
use prefork::{listener, logging, Server};

/// Shared arguments handed to every job.
struct EchoArgs {
    prefix: String,
}

impl EchoArgs {
    /// `ECHO_PREFIX` is prepended to every reply (default: none).
    fn from_env() -> Self {
        Self {
            prefix: env_or("ECHO_PREFIX", ""),
        }
    }
}

fn echo(stream: TcpStream, peer: SocketAddr, args: &EchoArgs) -> impl FnOnce() + Send + 'static {
    let prefix = args.prefix.clone();
    move || {
        let mut writer = match stream.try_clone() {
            Ok(writer) => writer,
            Err(e) => {
                warn!(peer = %peer, error = %e, "failed to clone connection");
                return;
            }
        };
        let pid = std::process::id();

        for line in BufReader::new(stream).lines() {
            let Ok(line) = line else { break };
            if writeln!(writer, "{}[{}] {}", prefix, pid, line).is_err() {
                break;
            }
        }
        debug!(peer = %peer, "connection closed");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut config = Config::from_env()?;
    logging::init(&config.logging);

    info!("Starting prefork {}", prefork::VERSION);
    config.log_summary();

    let listener = listener::bind(config.listener.addr, config.listener.backlog)?;
    info!("Listening on {}", listener.local_addr()?);

    let mut server = Server::new(config.pool.clone(), echo, EchoArgs::from_env())?;

    while server.run(&listener)? {
        info!("Reloading configuration");
        match Config::from_env() {
            Ok(reloaded) => {
                if reloaded.listener.addr != config.listener.addr {
                    warn!(
                        "LISTEN_ADDR changed to {}, keeping {} until restart",
                        reloaded.listener.addr, config.listener.addr
                    );
                }
                config = reloaded;
                config.log_summary();
            }
            Err(e) => warn!(error = %e, "reload failed, keeping previous configuration"),
        }
        server.reconfigure(config.pool.clone(), EchoArgs::from_env());
    }

    info!("Shutdown complete");
    Ok(())
}
