use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;
mod connect;
mod handshake;
mod relay;

use config::{ProxytabConfig, TunnelConfig};
use handshake::Negotiator;

#[derive(Parser)]
#[command(name = "proxytab")]
#[command(author = "Proxytab Team")]
#[command(version = "0.1.0")]
#[command(about = "Tunnel arbitrary streams through HTTP proxies", long_about = None)]
struct Cli {
    /// Tunnel through the given HTTP proxy (default port is 8080)
    #[arg(short = 'x', long, value_name = "PROXY[:PORT]")]
    proxy: Option<String>,

    /// Tunnel through to the given destination address (default port is 22)
    #[arg(short, long, value_name = "DEST[:PORT]")]
    dest: Option<String>,

    /// Use HTTP Basic authentication, with the credentials in the given file
    /// (of the form 'user\x00pass')
    #[arg(short, long, value_name = "AUTH_FILE")]
    auth_file: Option<PathBuf>,

    /// Seconds to wait on each step of the proxy handshake
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Read settings from this YAML file instead of searching for proxytab.yml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout and are not failures
            let code = if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
            let _ = e.print();
            return code;
        }
    };

    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("proxytab: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli));

    // The stdin reader thread may still be blocked in read(); don't wait for it
    runtime.shutdown_background();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("proxytab: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; stdout is the tunnel.
fn init_logging(verbose: bool) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = EnvFilter::new(log_directives(verbose, rust_log.as_deref()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `RUST_LOG` when set, otherwise our own crates at warn (debug with -v)
fn log_directives(verbose: bool, rust_log: Option<&str>) -> String {
    match rust_log {
        Some(directives) if !directives.trim().is_empty() => directives.to_string(),
        _ if verbose => "proxytab=debug,proxytab_shared=debug".to_string(),
        _ => "proxytab=warn,proxytab_shared=warn".to_string(),
    }
}

/// Connect, negotiate, then relay stdin/stdout until either side closes
async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    info!("Tunnelling to {} via proxy {}", config.destination, config.proxy);
    if let Some(creds) = &config.credentials {
        debug!(
            "Using HTTP basic authentication as '{}'",
            String::from_utf8_lossy(creds.username())
        );
    }

    let mut stream = connect::connect_proxy(&config.proxy, config.timeout).await?;

    let mut negotiator = Negotiator::new(&config);
    let established = negotiator.negotiate(&mut stream).await?;
    debug!("Handshake finished: {:?}", negotiator.state());
    info!("Proxy accepted tunnel: {}", established.response);

    let stats = relay::relay(
        stream,
        tokio::io::stdin(),
        tokio::io::stdout(),
        &established.leftover,
        config.poll_interval,
    )
    .await;

    info!(
        "Tunnel closed ({:?}): {} bytes sent, {} bytes received",
        stats.reason, stats.sent, stats.received
    );
    Ok(())
}

/// Layer command line flags over the config file
fn load_config(cli: &Cli) -> Result<TunnelConfig> {
    let file = match cli.config.clone().or_else(ProxytabConfig::find_config) {
        Some(path) => {
            debug!("Loading config from {}", path.display());
            ProxytabConfig::load(&path)?
        }
        None => ProxytabConfig::default(),
    };

    let flags = ProxytabConfig {
        proxy: cli.proxy.clone(),
        dest: cli.dest.clone(),
        auth_file: cli.auth_file.clone(),
        timeout_secs: cli.timeout,
    };

    file.merge(flags).build()
}
