use anyhow::{Context, Result};
use builder_rs::{Config, Service, ServiceHandle};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[clap(author, version, about = "block builder for ePBS and builder-API devnets", long_about = None)]
struct Cli {
    /// YAML configuration file; flags and environment variables override its
    /// values
    #[clap(long, value_name = "FILE", env = "BUILDER_CONFIG")]
    config: Option<String>,
    #[clap(long, env = "BUILDER_PRIVKEY", hide_env_values = true)]
    builder_privkey: Option<String>,
    #[clap(long, env = "BUILDER_FEE_RECIPIENT")]
    fee_recipient: Option<String>,
    #[clap(long, env = "CL_CLIENT")]
    cl_client: Option<String>,
    #[clap(long, env = "EL_ENGINE_API")]
    el_engine_api: Option<String>,
    #[clap(long, env = "EL_JWT_SECRET")]
    el_jwt_secret: Option<String>,
    #[clap(long, env = "EPBS_ENABLED")]
    epbs_enabled: Option<bool>,
    #[clap(long, env = "BUILDER_API_ENABLED")]
    builder_api_enabled: Option<bool>,
    #[clap(long, env = "BUILDER_API_PORT")]
    builder_api_port: Option<u16>,
    #[clap(long, env = "BLOCK_VALUE_SUBSIDY_GWEI")]
    block_value_subsidy_gwei: Option<u64>,
    #[clap(long, env = "USE_PROPOSER_FEE_RECIPIENT")]
    use_proposer_fee_recipient: Option<bool>,
    #[clap(long, env = "PAYLOAD_BUILD_TIME")]
    payload_build_time: Option<u64>,
    #[clap(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

fn config_from_yaml_file(path: &str) -> Result<Config> {
    let config_data = std::fs::read_to_string(path)
        .with_context(|| format!("could not read config from `{path}`"))?;
    serde_yaml::from_str(&config_data).context("could not parse YAML")
}

// precedence: CLI flags > YAML file > environment > built-in defaults
// (clap resolves flag-vs-environment per option)
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match cli.config.as_ref() {
        Some(path) => config_from_yaml_file(path)?,
        None => Config::default(),
    };
    if let Some(value) = cli.builder_privkey.as_ref() {
        config.builder_privkey = value.clone();
    }
    if let Some(value) = cli.fee_recipient.as_ref() {
        config.fee_recipient = value.clone();
    }
    if let Some(value) = cli.cl_client.as_ref() {
        config.cl_client = value.clone();
    }
    if let Some(value) = cli.el_engine_api.as_ref() {
        config.el_engine_api = value.clone();
    }
    if let Some(value) = cli.el_jwt_secret.as_ref() {
        config.el_jwt_secret = value.clone();
    }
    if let Some(value) = cli.epbs_enabled {
        config.epbs_enabled = value;
    }
    if let Some(value) = cli.builder_api_enabled {
        config.builder_api_enabled = value;
    }
    if let Some(value) = cli.builder_api_port {
        config.builder_api_port = value;
    }
    if let Some(value) = cli.block_value_subsidy_gwei {
        config.block_value_subsidy_gwei = value;
    }
    if let Some(value) = cli.use_proposer_fee_recipient {
        config.use_proposer_fee_recipient = value;
    }
    if let Some(value) = cli.payload_build_time {
        config.payload_build_time = value;
    }
    if let Some(value) = cli.log_level.as_ref() {
        config.log_level = value.clone();
    }
    Ok(config)
}

fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_until_signal(mut handle: ServiceHandle) -> Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("could not install SIGTERM handler")?;
    tokio::select! {
        result = &mut handle => {
            result.context("service task failed")?;
            return Ok(())
        }
        _ = signal::ctrl_c() => tracing::info!("received SIGINT; shutting down..."),
        _ = sigterm.recv() => tracing::info!("received SIGTERM; shutting down..."),
    }
    handle.shutdown();
    // HTTP servers drain for up to 10 s; give the rest a little slack too
    let _ = tokio::time::timeout(std::time::Duration::from_secs(12), &mut handle).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    setup_logging(&config.log_level);

    let service = Service::from(config);
    let handle = service.spawn().await.context("could not start builder")?;
    run_until_signal(handle).await
}
