use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

#[derive(Parser)]
#[command(name = "linehook")]
#[command(about = "Linehook: LINE webhook gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the webhook gateway (POST /webhook). Events are fanned out to the built-in handlers.
    Gateway {
        /// Config file path (default: LINEHOOK_CONFIG_PATH or ~/.linehook/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 15152)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Print the X-Line-Signature for a request body (for testing the webhook with curl).
    Sign {
        /// Config file path (default: LINEHOOK_CONFIG_PATH or ~/.linehook/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Channel secret; defaults to the configured one.
        #[arg(long)]
        secret: Option<String>,

        /// Body file, or "-" for stdin.
        #[arg(value_name = "FILE", default_value = "-")]
        body: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("linehook {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Sign {
            config,
            secret,
            body,
        }) => {
            if let Err(e) = run_sign(config, secret, body).await {
                log::error!("sign failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_gateway(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{} (config {})",
        config.gateway.bind,
        config.gateway.port,
        path.display()
    );
    let registry =
        lib::channels::HandlerRegistry::new().with(Arc::new(lib::handlers::LogHandler));
    lib::gateway::run_gateway(config, registry).await
}

async fn run_sign(
    config_path: Option<PathBuf>,
    secret: Option<String>,
    body_path: PathBuf,
) -> anyhow::Result<()> {
    let secret = match secret {
        Some(s) => s,
        None => {
            let (config, _) = lib::config::load_config(config_path)?;
            lib::config::resolve_channel_secret(&config)
                .ok_or_else(|| anyhow::anyhow!("no channel secret configured; pass --secret"))?
        }
    };
    let body = if body_path.as_os_str() == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin().read_to_end(&mut buf).await?;
        buf
    } else {
        tokio::fs::read(&body_path).await?
    };
    println!("{}", lib::channels::signature::sign(&secret, &body));
    Ok(())
}
