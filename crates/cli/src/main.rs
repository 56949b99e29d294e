use anyhow::Context;
use bookswap_app::{register_all, AppContext};
use bookswap_kernel::{settings::Settings, InitCtx, ModuleRegistry};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "bookswap")]
#[command(about = "Book trading service: shelves, wishlists and paired trade requests", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Boot every module and serve the HTTP API (default)
    Serve,

    /// Print the effective configuration as JSON
    Settings,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load().context("failed to load bookswap settings")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(settings),
        Commands::Settings => {
            let rendered = serde_json::to_string_pretty(&settings)
                .context("failed to render settings")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

#[tokio::main]
async fn serve(settings: Settings) -> anyhow::Result<()> {
    bookswap_telemetry::init(&settings.telemetry)?;
    tracing::info!(env = ?settings.environment, "bookswap bootstrap starting");

    let ctx = AppContext::from_settings(settings.clone())
        .context("failed to build application context")?;

    let mut registry = ModuleRegistry::new();
    register_all(&mut registry, &ctx);

    let init = InitCtx {
        settings: &settings,
    };
    registry.init_modules(&init).await?;
    registry.start_modules(&init).await?;

    let served = bookswap_http::start_server(&registry, &settings, shutdown_signal()).await;

    registry.stop_modules().await?;
    tracing::info!("bookswap shut down");
    served
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c; shutting down");
    }
    tracing::info!("shutdown signal received");
}
