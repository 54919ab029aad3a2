//! # HealthProbe: HTTP readiness polling.
//!
//! A probe issues an HTTP GET against the entry's health-check URL with a
//! bounded per-request timeout; success is any 2xx status. Response
//! bodies are drained so connections can be reused. An `https` scheme
//! selects TLS; ports default to 80/443 per the URL rules.
//!
//! [`wait_ready`] retries with fixed gaps up to an attempt cap inside an
//! overall budget and reports the first success.
//!
//! The [`Probe`] trait is the seam: the supervisor holds a `dyn Probe`
//! so tests can substitute a scripted one.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

/// Readiness check against a URL.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Returns true when the endpoint answered with a 2xx status.
    async fn check(&self, url: &str) -> bool;
}

/// Probe backed by a shared `reqwest` client.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Builds a probe with the given per-request transport timeout.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(resp) => {
                let ok = resp.status().is_success();
                // Drain the body so the connection can be reused.
                let _ = resp.bytes().await;
                ok
            }
            Err(e) => {
                debug!(url, error = %e, "health probe request failed");
                false
            }
        }
    }
}

/// Polls `url` until it answers 2xx or the budget runs out.
///
/// Up to `attempts` probes are issued, `gap` apart, never starting a new
/// attempt past `overall`. Returns true on the first success.
pub async fn wait_ready(
    probe: &dyn Probe,
    url: &str,
    overall: Duration,
    attempts: u32,
    gap: Duration,
) -> bool {
    let deadline = Instant::now() + overall;

    for attempt in 1..=attempts {
        if Instant::now() >= deadline {
            return false;
        }
        if probe.check(url).await {
            return true;
        }
        if attempt < attempts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            tokio::time::sleep(gap.min(remaining)).await;
        }
    }
    false
}
