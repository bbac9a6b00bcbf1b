use anyhow::Result;
use clap::Parser;
use commvault_exporter::{
    config::{LogFormat, Settings},
    probe::Prober,
    server::start_server,
    targets::TargetRegistry,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Commvault Exporter - multi-target Prometheus probe exporter for Commvault
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", env = "COMMVAULT_EXPORTER_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::load(args.config.as_deref())?;

    init_logging(&settings.exporter.log_level, settings.exporter.log_format)?;

    info!("Starting Commvault Exporter");
    info!("Listen address: {}", settings.exporter.listen_address);

    let targets = TargetRegistry::from_settings(&settings);
    if targets.is_empty() {
        warn!("No targets configured; every probe will return 404");
    }
    for target in targets.iter() {
        info!(
            target_name = %target.name,
            "Configured target {} ({} categories)",
            target.api_url,
            target.categories.len()
        );
    }

    let prober = Prober::new(targets, settings.probe.clone())?;
    info!("Prober initialized");

    if let Err(e) = start_server(&settings.exporter.listen_address, prober).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}

/// Initialize structured logging with tracing.
fn init_logging(log_level: &str, format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
    }

    Ok(())
}
