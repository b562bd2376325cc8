//! Entry point for `drtp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client**
//! mode.  All protocol work is delegated to the library; `main.rs` owns only
//! process setup (logging, argument parsing, file I/O).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use drtp::fault::FaultConfig;
use drtp::socket::Socket;
use drtp::timer::TimerConfig;
use drtp::{ReliabilityMode, TransferConfig};

/// Unprivileged port range both ends must use.
const PORT_RANGE: std::ops::RangeInclusive<u16> = 1024..=65535;

/// Parse `ip:port`, refusing ports outside [`PORT_RANGE`].
fn check_port(s: &str) -> Result<SocketAddr, String> {
    let addr: SocketAddr = s.parse().map_err(|e| format!("{e}"))?;
    if !PORT_RANGE.contains(&addr.port()) {
        return Err(format!(
            "port {} is outside {}-{}",
            addr.port(),
            PORT_RANGE.start(),
            PORT_RANGE.end()
        ));
    }
    Ok(addr)
}

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Receive one file and exit.
    Server {
        /// Local address to bind (e.g. 0.0.0.0:8088).
        #[arg(short, long, default_value = "0.0.0.0:8088", value_parser = check_port)]
        bind: SocketAddr,

        /// Where to write the received bytes.
        #[arg(short, long, default_value = "received.bin")]
        output: PathBuf,

        /// Drop the first ACK carrying this ack number.
        #[arg(long)]
        drop_ack: Option<u32>,

        #[command(flatten)]
        common: Common,
    },
    /// Send one file to a server.
    Client {
        /// Remote server address (e.g. 127.0.0.1:8088).
        #[arg(short, long, value_parser = check_port)]
        server: SocketAddr,

        /// File to send.
        #[arg(short, long)]
        file: PathBuf,

        /// Drop the first transmission of this data packet.
        #[arg(long)]
        drop_seq: Option<u32>,

        /// Send this data packet twice.
        #[arg(long)]
        duplicate_seq: Option<u32>,

        /// Probability of dropping any data packet.
        #[arg(long, default_value_t = 0.0)]
        loss_rate: f64,

        /// Seed for random loss.
        #[arg(long, default_value_t = 0)]
        seed: u64,

        #[command(flatten)]
        common: Common,
    },
}

/// Settings both ends must agree on.
#[derive(Args)]
struct Common {
    /// Reliability mode: stop-and-wait, GBN or SR.
    #[arg(short = 'r', long = "reliability", default_value = "stop-and-wait")]
    reliability: ReliabilityMode,

    /// Window size in packets (GBN / SR).
    #[arg(
        short,
        long,
        default_value_t = 5,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    window: u16,

    /// Round-trip time estimate in milliseconds; timeout is 4 × RTT.
    #[arg(
        long,
        default_value_t = 125,
        value_parser = clap::value_parser!(u64).range(1..=60_000)
    )]
    rtt_ms: u64,
}

impl Common {
    fn config(&self, faults: FaultConfig) -> TransferConfig {
        TransferConfig {
            mode: self.reliability,
            window: usize::from(self.window),
            timer: TimerConfig::with_rtt(Duration::from_millis(self.rtt_ms)),
            faults,
            ..TransferConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server {
            bind,
            output,
            drop_ack,
            common,
        } => {
            let config = common.config(FaultConfig {
                drop_ack,
                ..FaultConfig::default()
            });
            let socket = Socket::bind(bind)
                .await
                .with_context(|| format!("binding {bind}"))?;
            log::info!("Server listening on {} ({} mode)", socket.local_addr, config.mode);

            let data = drtp::run_server_transfer(socket, config)
                .await
                .context("receiving transfer")?;
            std::fs::write(&output, &data)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("received {} bytes into {}", data.len(), output.display());
        }
        Mode::Client {
            server,
            file,
            drop_seq,
            duplicate_seq,
            loss_rate,
            seed,
            common,
        } => {
            let config = common.config(FaultConfig {
                drop_seq,
                duplicate_seq,
                loss_rate,
                seed,
                ..FaultConfig::default()
            });
            let source = std::fs::File::open(&file)
                .with_context(|| format!("opening {}", file.display()))?;
            let socket = Socket::bind("0.0.0.0:0".parse()?)
                .await
                .context("binding client socket")?;
            log::info!("Sending {} to {server} ({} mode)", file.display(), config.mode);

            let stats = drtp::run_client_transfer(socket, server, config, source)
                .await
                .context("sending transfer")?;
            println!("{stats}");
        }
    }

    Ok(())
}
