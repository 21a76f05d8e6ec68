//! Connect to redis as configured and report whether it answers.

use clap::Parser;
use redis_connector::{Config, ConnectionFactory, metrics};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "redis-probe")]
#[command(about = "Check redis or sentinel connectivity using a config file")]
struct Args {
    /// Path to configuration file
    config: Option<PathBuf>,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            eprintln!("No config file specified. Pass a path or use --print-config");
            std::process::exit(1);
        }
    };

    if let Err(e) = redis_connector::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start runtime");
            std::process::exit(1);
        }
    };

    let ok = runtime.block_on(probe(&config));

    tracing::info!(
        sentinel_dial_errors = metrics::SENTINEL_DIAL_ERRORS.value(),
        redis_dial_errors = metrics::REDIS_DIAL_ERRORS.value(),
        sentinel_master_errors = metrics::SENTINEL_MASTER_ERRORS.value(),
        total_connections = metrics::TOTAL_CONNECTIONS.value(),
        "connection counters"
    );

    if !ok {
        std::process::exit(1);
    }
}

async fn probe(config: &Config) -> bool {
    let factory = ConnectionFactory::new();

    if let Err(e) = factory.configure(config.redis.as_ref()) {
        tracing::error!(error = %e, "invalid redis configuration");
        return false;
    }

    let Some(client) = factory.client() else {
        tracing::warn!("no [redis] section configured, nothing to probe");
        return true;
    };

    let result = client.ping().await;
    client.close();

    match result {
        Ok(()) => {
            tracing::info!(failover = client.is_failover(), "redis answered PING");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "redis PING failed");
            false
        }
    }
}

fn print_default_config() {
    let config = r#"# redis-probe configuration

[redis]
# Endpoint for a single redis server. "tcp://" is accepted as "redis://".
url = "redis://localhost:6379"

# Database index (default: 0)
# db = 0

# password = ""

# Connection pool sizing (default: 1 each)
# max_idle = 1
# max_active = 1

# Sentinel URLs. When set, `url` is ignored and the master is looked up
# through the sentinels. A password embedded in a URL is used for the
# sentinels unless sentinel_password is set.
# sentinel = ["redis://:password@sentinel-1:26379", "redis://sentinel-2:26379"]
# sentinel_master = "mymaster"
# sentinel_password = ""

[logging]
# Log level: "error", "warn", "info", "debug", "trace"
level = "info"

# Log format: "pretty", "json", or "compact"
format = "pretty"
"#;
    print!("{}", config);
}
