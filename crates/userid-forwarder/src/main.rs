#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use userid_agent::aggregator::{AggregatorConfig, EntryAggregator};
use userid_agent::config::Config;
use userid_agent::connector::EndpointConnector;
use userid_agent::record::RecordParser;
use userid_agent::tailer::{Tailer, TailerConfig};
use userid_agent::watcher::RotationDetector;

const DEFAULT_CONFIG_FILE: &str = "userid-forwarder.json";

#[tokio::main]
pub async fn main() {
    let config_file = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
    let config = match Config::load(&PathBuf::from(&config_file)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error loading configuration {config_file}: {e:#}");
            return;
        }
    };

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", config.log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("logging subsystem enabled");
    info!(log_dir = %config.log_dir.display(), "starting userid forwarder");

    let primary = match EndpointConnector::new(&config.primary) {
        Ok(connector) => connector,
        Err(e) => {
            error!("error creating the primary endpoint connector: {e}");
            return;
        }
    };
    let secondary = match EndpointConnector::new(&config.secondary) {
        Ok(connector) => connector,
        Err(e) => {
            error!("error creating the secondary endpoint connector: {e}");
            return;
        }
    };
    primary.start_health_check("initial connection check");
    secondary.start_health_check("initial connection check");

    let parser = match RecordParser::new(&config.default_domain, &config.include_pattern) {
        Ok(parser) => parser,
        Err(e) => {
            error!("error creating the record parser: {e}");
            return;
        }
    };

    let aggregator = Arc::new(EntryAggregator::new(AggregatorConfig {
        max_pending_entries: config.max_pending_entries,
        userid_timeout: config.userid_timeout,
        dyn_address_feature: config.dyn_address_feature,
        primary: Arc::clone(&primary),
        secondary: Arc::clone(&secondary),
    }));

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop signal received, shutting down");
            signal_cancel.cancel();
        }
    });

    let mut tailer = Tailer::new(TailerConfig {
        detector: RotationDetector::new(&config.log_dir),
        parser,
        aggregator,
        primary,
        secondary,
        flush_period: Duration::from_millis(config.panos_buffered_time),
        cancel,
    });
    if let Err(e) = tailer.run().await {
        error!(error = %e, "tailer terminated with a fatal error");
    }
}
