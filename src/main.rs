mod cli;

use narravox::{
    config,
    frames::FfmpegDecoder,
    server::{self, AppContext},
};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::sync::Arc;

async fn start_server(
    host: String,
    port: u16,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    config.server.host = host;
    config.server.port = port;

    tracing::info!("Starting narravox server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    let api_key = config::resolve_api_key(&config);
    if api_key.is_none() {
        tracing::warn!(
            "No API key configured; extract/script/narration stages are disabled"
        );
    }

    let decoder = Arc::new(FfmpegDecoder::discover(config.frames.ffmpeg_path.as_deref()));
    let ctx = AppContext::new(config, api_key, decoder, None)?;

    server::start_server(ctx).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "narravox=trace,tower_http=debug".to_string()
        } else {
            "narravox=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("narravox {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn check_tools() -> Result<()> {
    println!("Checking external tools...\n");

    let decoder = FfmpegDecoder::discover(None);
    match decoder.binary() {
        Some(path) => {
            print!("\u{2713} ffmpeg - {}", path.display());
            let version = std::process::Command::new(path).arg("-version").output();
            if let Ok(output) = version {
                let text = String::from_utf8_lossy(&output.stdout);
                if let Some(line) = text.lines().next() {
                    print!(" ({})", line);
                }
            }
            println!();
            println!("\nAll required tools are available!");
        }
        None => {
            println!("\u{2717} ffmpeg");
            println!("\nffmpeg is missing. Install it to enable frame extraction.");
        }
    }

    Ok(())
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("\u{2713} Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!(
                "  API key configured: {}",
                config::resolve_api_key(&config).is_some()
            );
            println!("  Vision model: {}", config.openai.vision_model);
            println!(
                "  Speech: {} ({})",
                config.openai.speech_model, config.openai.voice
            );
            println!("  Frame sample stride: {}", config.frames.sample_stride);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }

    Ok(())
}
