//! Probe Engine (component A). Dispatches a [`crate::model::Monitor`] to the
//! protocol-specific probe and returns a [`CheckResult`] within the
//! monitor's configured timeout. No probe is ever allowed to block
//! indefinitely — every suspension point is wrapped in `tokio::time::timeout`.

mod dns;
mod http;
mod ping;
mod smtp;
mod ssl;
mod tcp;
mod udp;

use crate::classify;
use crate::model::{CheckMeta, CheckResult, Monitor, Protocol};
use std::time::Duration;

/// Shared HTTP clients, built once and reused across probes: one that
/// follows redirects, one that doesn't, so each monitor's
/// `follow_redirects` flag picks the right client without rebuilding one
/// per check.
pub struct ProbeClients {
    pub follow: reqwest::Client,
    pub no_follow: reqwest::Client,
}

impl ProbeClients {
    pub fn build() -> Result<Self, reqwest::Error> {
        let follow = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        let no_follow = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(ProbeClients { follow, no_follow })
    }

    fn pick(&self, follow_redirects: bool) -> &reqwest::Client {
        if follow_redirects {
            &self.follow
        } else {
            &self.no_follow
        }
    }
}

/// Run exactly one probe against `monitor`. Never returns `Err` — every
/// failure mode is normalised into a `CheckResult` with `is_up = false`.
pub async fn probe(clients: &ProbeClients, monitor: &Monitor) -> CheckResult {
    if let Err(error_type) = classify::validate_target(monitor.protocol, &monitor.target) {
        return CheckResult::failure(
            0,
            error_type,
            classify::format_message(error_type, None, "target failed pre-probe validation"),
            CheckMeta::None,
        );
    }

    match monitor.protocol {
        Protocol::Http | Protocol::Https => {
            http::check(clients.pick(monitor.follow_redirects), monitor).await
        }
        Protocol::Tcp => tcp::check(monitor).await,
        Protocol::Udp => udp::check(monitor).await,
        Protocol::Dns => dns::check(monitor).await,
        Protocol::Smtp => smtp::check(monitor).await,
        Protocol::Ssl => ssl::check(monitor).await,
        Protocol::Ping => ping::check(monitor).await,
    }
}

/// Shared helper: fold a response time against the monitor's effective
/// degradation threshold (its own `degraded_threshold_ms`, or the
/// protocol's default when unset).
fn degrade_on_slow_response(
    protocol: Protocol,
    degraded_threshold_ms: Option<u32>,
    elapsed_ms: u32,
    status_code: Option<u16>,
    meta: CheckMeta,
) -> CheckResult {
    match classify::effective_threshold(protocol, degraded_threshold_ms) {
        Some(threshold) if elapsed_ms > threshold => {
            let mut result = CheckResult::ok(elapsed_ms, status_code, meta);
            result.error_message = Some(format!(
                "response time {elapsed_ms}ms exceeds {threshold}ms threshold"
            ));
            result
        }
        _ => CheckResult::ok(elapsed_ms, status_code, meta),
    }
}

pub(crate) use degrade_on_slow_response as degrade_on_slow;
