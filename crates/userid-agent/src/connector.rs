//! HTTP connector for one User-ID API endpoint.
//!
//! A connector starts not ready. A keepalive probe runs immediately and then
//! once a minute until the endpoint answers, at which point the connector is
//! ready to carry updates. Any send failure drops it back to not ready and
//! restarts the probe cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::{EndpointConfig, VSYS_NONE};
use crate::errors::Creation;
use crate::periodic::{spawn_periodic, PeriodicTask, TickOutcome};

const CHECK_COMMAND: &str = "<check><pending-changes></pending-changes></check>";
const PROBE_PERIOD: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct EndpointConnector {
    /// Full URL of the API resource, `<base>/api/`.
    api_url: String,
    api_key: String,
    vsys: String,
    client: reqwest::Client,
    ready: AtomicBool,
    give_up: AtomicBool,
    /// Set while a probe task is scheduled; keeps probes from piling up.
    probing: AtomicBool,
    probe_period: Duration,
    /// Handle to self for spawning the probe task.
    weak: Weak<EndpointConnector>,
}

impl EndpointConnector {
    pub fn new(config: &EndpointConfig) -> Result<Arc<Self>, Creation> {
        Self::with_probe_period(config, PROBE_PERIOD)
    }

    /// Builds a connector probing at the given period instead of the
    /// default one minute.
    pub fn with_probe_period(
        config: &EndpointConfig,
        probe_period: Duration,
    ) -> Result<Arc<Self>, Creation> {
        // Field devices commonly present self-signed certificates.
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Arc::new_cyclic(|weak| EndpointConnector {
            api_url: format!("{}/api/", config.url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            vsys: config.vsys.clone(),
            client,
            ready: AtomicBool::new(false),
            give_up: AtomicBool::new(false),
            probing: AtomicBool::new(false),
            probe_period,
            weak: weak.clone(),
        }))
    }

    pub fn url(&self) -> &str {
        &self.api_url
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Marks the endpoint not ready and begins probing it until it answers.
    /// At most one probe task runs per connector; a failure while one is
    /// already scheduled only logs the reason.
    pub fn start_health_check(&self, reason: &str) {
        self.ready.store(false, Ordering::SeqCst);
        info!(endpoint = %self.api_url, "{reason}");
        if self.probing.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(connector) = self.weak.upgrade() else {
            return;
        };
        debug!(endpoint = %self.api_url, "starting the connection check timer");
        spawn_periodic(connector, self.probe_period, CancellationToken::new());
    }

    /// Sends one uid-message update. Any failure marks the endpoint not
    /// ready, starts a probe cycle and yields `None`; success yields the raw
    /// acknowledgement body.
    pub async fn send(&self, message: &str) -> Option<String> {
        let mut params = String::from("type=user-id");
        if self.vsys != VSYS_NONE {
            params.push_str(&format!("&vsys={}", urlencoding::encode(&self.vsys)));
        }
        params.push_str(&format!(
            "&action=set&key={}&cmd={}",
            urlencoding::encode(&self.api_key),
            urlencoding::encode(message)
        ));
        match self.post(params).await {
            Ok(body) => {
                trace!(endpoint = %self.api_url, %body, "update acknowledged");
                Some(body)
            }
            Err(e) => {
                debug!(endpoint = %self.api_url, error = %e, "update failed");
                self.start_health_check(&format!("lost connection with {}", self.api_url));
                None
            }
        }
    }

    /// Flags the connector so its probe task exits on its next tick. Sends
    /// routed here afterwards fail the readiness check.
    pub fn give_up(&self) {
        self.give_up.store(true, Ordering::SeqCst);
    }

    pub fn shutdown(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.give_up.store(true, Ordering::SeqCst);
        debug!(endpoint = %self.api_url, "connector shut down");
    }

    async fn probe(&self) -> Result<String, reqwest::Error> {
        let params = format!(
            "type=op&key={}&cmd={}",
            urlencoding::encode(&self.api_key),
            urlencoding::encode(CHECK_COMMAND)
        );
        self.post(params).await
    }

    async fn post(&self, params: String) -> Result<String, reqwest::Error> {
        let response = self
            .client
            .post(&self.api_url)
            .header(
                "Content-Type",
                "application/x-www-form-urlencoded; charset=utf-8",
            )
            .body(params)
            .send()
            .await?
            .error_for_status()?;
        response.text().await
    }
}

#[async_trait]
impl PeriodicTask for EndpointConnector {
    /// One keepalive probe. Failures leave the state untouched for the next
    /// tick; success ends the probe cycle and marks the endpoint ready.
    async fn on_tick(&self) -> TickOutcome {
        if self.give_up.load(Ordering::SeqCst) {
            debug!(endpoint = %self.api_url, "giving up connection checks");
            self.probing.store(false, Ordering::SeqCst);
            return TickOutcome::Stop;
        }
        match self.probe().await {
            Ok(body) if body.contains("success") => {
                info!(endpoint = %self.api_url, "alive check succeeded");
                self.ready.store(true, Ordering::SeqCst);
                self.probing.store(false, Ordering::SeqCst);
                TickOutcome::Stop
            }
            Ok(_) => {
                info!(endpoint = %self.api_url, "non-success response to alive check");
                TickOutcome::Continue
            }
            Err(e) => {
                info!(endpoint = %self.api_url, error = %e, "alive check failed");
                TickOutcome::Continue
            }
        }
    }
}
