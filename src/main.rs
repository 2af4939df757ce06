//! Binary entrypoint for the serialbridge CLI.
//!
//! Commands:
//! - `run [--port <path>] [--url <url>]` - bridge the serial device to HTTP until Ctrl-C
//! - `init` - write a starter `config.toml`
//! - `ports` - list serial ports as JSON
//! - `send (--hex <bytes> | --log <message>)` - deliver one payload and exit
//! - `status` - print the effective configuration
//!
//! See the library crate docs for module-level details: `serialbridge::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::sync::Arc;

use serialbridge::bridge::Bridge;
use serialbridge::config::Config;
use serialbridge::events::{EventSink, LogSink};
use serialbridge::pipeline::LogLevel;

#[derive(Parser)]
#[command(name = "serialbridge")]
#[command(about = "Forward serial device output to an HTTP endpoint")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the serial device and forward everything it sends
    Run {
        /// Serial port (e.g., /dev/ttyUSB0); overrides the config file
        #[arg(short, long)]
        port: Option<String>,

        /// Endpoint URL; overrides the config file and enables delivery
        #[arg(short, long)]
        url: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// List available serial ports
    Ports,
    /// Deliver a single payload through the normal pipeline
    Send {
        /// Data payload as hex (e.g., 01ab)
        #[arg(long, conflicts_with = "message")]
        hex: Option<String>,

        /// Log message to deliver instead of data
        #[arg(long = "log")]
        message: Option<String>,

        /// Level for --log (info, success, error, http)
        #[arg(long, default_value = "info")]
        level: String,
    },
    /// Show the effective configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Ports => {
            let config = pre_config.unwrap_or_default();
            let bridge = make_bridge(config)?;
            println!("{}", serde_json::to_string_pretty(&bridge.list_ports())?);
            bridge.shutdown().await;
        }
        Commands::Run { port, url } => {
            let mut config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            if let Some(port) = port {
                config.serial.port = port;
            }
            if let Some(url) = url {
                config.http.url = url;
                config.http.enabled = true;
            }
            info!("Starting serialbridge v{}", env!("CARGO_PKG_VERSION"));
            run(config).await?;
        }
        Commands::Send {
            hex,
            message,
            level,
        } => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            if !config.http.enabled {
                warn!("http.enabled is false; the payload will be reported but not sent");
            }
            let bridge = make_bridge(config)?;
            let sent = match (hex, message) {
                (Some(hex), _) => {
                    let bytes = hex::decode(hex.trim())
                        .map_err(|e| anyhow!("invalid hex payload: {}", e))?;
                    bridge.send_data(bytes)
                }
                (None, Some(message)) => bridge.send_log(parse_level(&level)?, message),
                (None, None) => return Err(anyhow!("nothing to send: pass --hex or --log")),
            };
            // Shutdown drains the queue, so the attempt completes before exit.
            bridge.shutdown().await;
            sent?;
            let stats = bridge.stats();
            if stats.deliveries_failed > 0 {
                std::process::exit(1);
            }
        }
        Commands::Status => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            let port = if config.serial.port.is_empty() {
                "(none)"
            } else {
                config.serial.port.as_str()
            };
            println!("serialbridge v{}", env!("CARGO_PKG_VERSION"));
            println!("serial:   {} ({})", port, config.serial.line_settings());
            println!(
                "http:     {} [{}] timeout {} ms",
                if config.http.url.is_empty() {
                    "(none)"
                } else {
                    config.http.url.as_str()
                },
                if config.http.enabled { "enabled" } else { "disabled" },
                config.http.timeout_ms
            );
            println!(
                "pipeline: batch {} chunks / {} ms, queue {}, concurrency {}, forward logs {}",
                config.pipeline.max_buffer_size,
                config.pipeline.flush_interval_ms,
                config.pipeline.request_queue_limit,
                config.pipeline.max_concurrent_requests,
                config.pipeline.forward_logs
            );
        }
    }

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let stats_every = config.pipeline.stats_interval();
    let bridge = make_bridge(config)?;

    if let Err(e) = bridge.connect().await {
        // The link stays usable; keep running so deliveries of forwarded logs complete.
        warn!("Serial connect failed: {} (bridge continuing without device)", e);
    }

    let mut ticker = stats_every.map(tokio::time::interval);
    loop {
        let tick = async {
            match ticker.as_mut() {
                Some(t) => {
                    t.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            _ = tick => {
                let q = bridge.queue_stats();
                info!(
                    "stats: {} | status={} pending={}/{}",
                    bridge.stats(),
                    bridge.status(),
                    q.pending,
                    q.limit
                );
            }
        }
    }

    bridge.shutdown().await;
    Ok(())
}

fn make_bridge(config: Config) -> Result<Bridge> {
    let sink: Arc<dyn EventSink> = Arc::new(LogSink);
    #[cfg(feature = "serial")]
    let bridge = Bridge::new(config, sink)?;
    #[cfg(not(feature = "serial"))]
    let bridge = {
        warn!("built without the 'serial' feature; using the simulated device");
        Bridge::with_opener(
            config,
            sink,
            Arc::new(serialbridge::serial::SimulatedOpener::new()),
        )?
    };
    Ok(bridge)
}

fn parse_level(s: &str) -> Result<LogLevel> {
    match s.to_ascii_lowercase().as_str() {
        "info" => Ok(LogLevel::Info),
        "success" => Ok(LogLevel::Success),
        "error" => Ok(LogLevel::Error),
        "http" => Ok(LogLevel::Http),
        other => Err(anyhow!("unknown log level '{}'", other)),
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    match log_file {
        Some(f) => {
            let file = std::sync::Mutex::new(f);
            // Foreground runs also echo to the console
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                writeln!(
                    fmt,
                    "{} [{}] {}",
                    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                    record.level(),
                    record.args()
                )
            });
        }
    }
    let _ = builder.try_init();
}
