use clap::Parser;
use examdesk_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};
use examdesk_server::{ExamdeskServer, bootstrap, build_app, observability};

#[derive(Debug, Parser)]
#[command(name = "examdesk-server", version, about = "Student exam portal backend")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, env = "EXAMDESK_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Force debug-level logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist - it's optional
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    let cli = Cli::parse();

    let cfg = match load_config(Some(&cli.config)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    observability::init_tracing(&cfg.logging);
    if cli.debug {
        observability::apply_logging_level("debug");
    }
    tracing::info!(path = %cli.config, "Configuration loaded");

    let state = match bootstrap::bootstrap(&cfg).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Server initialization failed: {e:#}");
            std::process::exit(2);
        }
    };

    let app = build_app(state, cfg.server.body_limit_bytes);
    if let Err(err) = ExamdeskServer::new(cfg.addr(), app).run().await {
        eprintln!("Server error: {err}");
        std::process::exit(1);
    }
}
