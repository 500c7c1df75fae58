//! netcore: drive the transport layer by hand.
//!
//! ```text
//! netcore connect example.org:443 --mode always-secure
//! netcore listen 127.0.0.1:7000 --cert cert.pem --key key.pem
//! netcore interfaces
//! netcore resolve localhost:http
//! ```

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;

use clap::{Parser, Subcommand};
use serde_json::json;

use netcore::config::{load_config, TransportConfig};
use netcore::net::endpoint;
use netcore::observability::{init_logging, metrics};
use netcore::{Address, ConnectMode, Connection, ListenMode, Listener, Protocol};

#[derive(Parser)]
#[command(name = "netcore")]
#[command(about = "Blocking plain/TLS transport toolkit", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured log level.
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a peer and exchange stdin lines with it
    Connect {
        /// Peer endpoint; defaults to the configured client endpoint
        endpoint: Option<String>,
        #[arg(short, long)]
        mode: Option<ConnectMode>,
        /// Trust store directory or PEM bundle
        #[arg(long)]
        ca: Option<PathBuf>,
        /// Server name to send and verify
        #[arg(long)]
        sni: Option<String>,
        #[arg(long)]
        ciphers: Option<String>,
    },
    /// Accept connections and echo every line back
    Listen {
        /// Bind endpoint; defaults to the configured bind address
        endpoint: Option<String>,
        #[arg(long, requires = "key")]
        cert: Option<PathBuf>,
        #[arg(long, requires = "cert")]
        key: Option<PathBuf>,
        /// Serve a single connection, then exit
        #[arg(long)]
        once: bool,
    },
    /// List local interface addresses
    Interfaces {
        #[arg(long)]
        json: bool,
    },
    /// Resolve an endpoint
    Resolve {
        endpoint: String,
        #[arg(short, long, default_value = "tcp")]
        protocol: Protocol,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => TransportConfig::default(),
    };
    let level = cli.log_level.as_deref().unwrap_or(&config.observability.log_level);
    init_logging(level, config.observability.json_logs);
    metrics::describe();

    netcore::ensure_initialized()?;
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "netcore starting");

    match cli.command {
        Commands::Connect {
            endpoint,
            mode,
            ca,
            sni,
            ciphers,
        } => {
            let target = endpoint.unwrap_or_else(|| config.client.endpoint.clone());
            let mut options = config.client.connect_options();
            if let Some(ca) = ca {
                options.trust_store = ca;
            }
            if sni.is_some() {
                options.sni_host = sni;
            }
            if ciphers.is_some() {
                options.cipher_list = ciphers;
            }
            run_connect(&target, mode.unwrap_or(config.client.mode), &options)?;
        }
        Commands::Listen {
            endpoint,
            cert,
            key,
            once,
        } => {
            let bind = endpoint.unwrap_or_else(|| config.server.bind_address.clone());
            let mut options = config.server.listen_options();
            if cert.is_some() && key.is_some() {
                options.certificate = cert;
                options.private_key = key;
                options.mode = ListenMode::Secure;
            }
            run_listen(&bind, options, once)?;
        }
        Commands::Interfaces { json } => {
            for address in Address::try_local_addresses()? {
                let interface = address.interface().unwrap_or("-");
                if json {
                    let entry = json!({
                        "interface": interface,
                        "address": address.format(false, false)?,
                        "network": address.classify(),
                    });
                    println!("{}", entry);
                } else {
                    println!("{:<12} {:<40} {}", interface, address.format(false, false)?, address.classify());
                }
            }
        }
        Commands::Resolve {
            endpoint: target,
            protocol,
            json,
        } => {
            for address in endpoint::resolve(&target, "", None, Some(protocol))? {
                if json {
                    let entry = json!({
                        "address": address.format(false, false)?,
                        "port": address.port(),
                        "protocol": address.protocol(),
                        "network": address.classify(),
                    });
                    println!("{}", entry);
                } else {
                    println!("{} ({})", address.format(true, true)?, address.classify());
                }
            }
        }
    }

    Ok(())
}

fn run_connect(target: &str, mode: ConnectMode, options: &netcore::ConnectOptions) -> Result<(), Box<dyn std::error::Error>> {
    let (host, _) = endpoint::split_endpoint(target)?;
    let host = host.unwrap_or("127.0.0.1").to_string();
    let port = endpoint::resolve(target, &host, None, None)?
        .first()
        .map(|a| a.port())
        .unwrap_or(0);

    let mut conn = Connection::connect(&host, port, mode, options)?;
    tracing::info!(
        connection_id = %conn.id(),
        peer = %conn.peer_address()?,
        secure = conn.is_secure(),
        verified = conn.peer_verified(),
        protocol = conn.protocol_version().as_deref().unwrap_or("-"),
        cipher = conn.cipher_suite().as_deref().unwrap_or("-"),
        "Connected"
    );

    let stdout = io::stdout();
    for line in io::stdin().lock().lines() {
        let line = line?;
        conn.write_all(line.as_bytes())?;
        conn.write_all(b"\n")?;
        let (reply, count) = conn.read_line()?;
        if count == 0 {
            tracing::info!("Peer closed the connection");
            break;
        }
        writeln!(stdout.lock(), "{}", reply)?;
    }
    conn.close()?;
    Ok(())
}

fn run_listen(bind: &str, options: netcore::ListenOptions, once: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut listener = Listener::listen(bind, options)?;
    tracing::info!(address = %listener.local_addr()?, mode = %listener.mode(), "Listening for connections");

    loop {
        let conn = match listener.accept() {
            Ok(conn) => conn,
            Err(e) if once => return Err(e.into()),
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                continue;
            }
        };
        if once {
            echo(conn);
            return Ok(());
        }
        thread::spawn(move || echo(conn));
    }
}

fn echo(mut conn: Connection) {
    let id = conn.id();
    loop {
        match conn.read_line() {
            Ok((_, 0)) => break,
            Ok((line, _)) => {
                let reply = format!("{}\n", line);
                if let Err(e) = conn.write_all(reply.as_bytes()) {
                    tracing::warn!(connection_id = %id, error = %e, "Echo write failed");
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Echo read failed");
                break;
            }
        }
    }
    if let Err(e) = conn.close() {
        tracing::debug!(connection_id = %id, error = %e, "Close failed");
    }
}
