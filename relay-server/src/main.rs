use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "relay-server")]
#[command(about = "MCP over Server-Sent-Events relay")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "relay.toml")]
    config: String,

    /// Host to bind to (overrides server.bind_addr)
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Port to listen on (overrides server.bind_addr)
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Upstream REST API base URL (overrides upstream.base_url)
    #[arg(long, env = "UPSTREAM_URL")]
    upstream_url: Option<String>,
}

fn init_tracing(observability: &relay::config::ObservabilityConfig) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| observability.log_level.clone()),
    );
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| observability.log_format.clone());

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Merge CLI overrides into the configured bind address
fn bind_addr(configured: &str, host: Option<&str>, port: Option<u16>) -> String {
    let (cfg_host, cfg_port) = configured
        .rsplit_once(':')
        .unwrap_or((configured, "3000"));
    let host = host.unwrap_or(cfg_host);
    match port {
        Some(port) => format!("{}:{}", host, port),
        None => format!("{}:{}", host, cfg_port),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load config
    let mut config = relay::Config::load_or_create(std::path::Path::new(&args.config))?;
    init_tracing(&config.observability);

    tracing::info!("Config file: {}", args.config);

    if let Some(url) = args.upstream_url {
        config.upstream.base_url = Some(url);
    }
    config.server.bind_addr = bind_addr(
        &config.server.bind_addr,
        args.host.as_deref(),
        args.port,
    );
    config.validate()?;

    let addr = config.server.bind_addr.clone();
    let metrics_enabled = config.observability.metrics_enabled;
    tracing::info!(
        "Session policy: {:?}, handler timeout: {}ms",
        config.session.policy,
        config.session.handler_timeout_ms
    );

    let mut server = relay::api::ApiServer::new(config)?;
    if metrics_enabled {
        server = server.with_prometheus()?;
    }

    tracing::info!("Starting relay server on {}", addr);
    server.serve(&addr).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_addr_overrides() {
        assert_eq!(bind_addr("127.0.0.1:3000", None, None), "127.0.0.1:3000");
        assert_eq!(bind_addr("127.0.0.1:3000", None, Some(8080)), "127.0.0.1:8080");
        assert_eq!(bind_addr("127.0.0.1:3000", Some("0.0.0.0"), None), "0.0.0.0:3000");
        assert_eq!(bind_addr("localhost", None, Some(1)), "localhost:1");
    }
}
