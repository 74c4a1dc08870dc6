use super::degrade_on_slow;
use crate::classify::{self, ErrorType};
use crate::model::{CheckMeta, CheckResult, Monitor};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// TCP connectivity probe: opens and immediately closes a connection to the
/// configured host/port, timing the handshake.
pub async fn check(monitor: &Monitor) -> CheckResult {
    let start = Instant::now();
    let addr = monitor
        .target
        .strip_prefix("tcp://")
        .unwrap_or(&monitor.target);

    let result = tokio::time::timeout(
        Duration::from_millis(monitor.timeout_ms as u64),
        TcpStream::connect(addr),
    )
    .await;
    let elapsed_ms = start.elapsed().as_millis() as u32;

    match result {
        Ok(Ok(stream)) => {
            let resolved_addr = stream.peer_addr().ok().map(|a| a.to_string());
            let meta = CheckMeta::Tcp { resolved_addr };
            degrade_on_slow(monitor.protocol, monitor.degraded_threshold_ms, elapsed_ms, None, meta)
        }
        Ok(Err(e)) => {
            let error_type = if e.kind() == std::io::ErrorKind::ConnectionRefused {
                ErrorType::ConnectionRefused
            } else {
                ErrorType::Timeout
            };
            CheckResult::failure(
                elapsed_ms,
                error_type,
                classify::format_message(error_type, None, &format!("connect failed: {e}")),
                CheckMeta::None,
            )
        }
        Err(_) => CheckResult::failure(
            elapsed_ms,
            ErrorType::Timeout,
            classify::format_message(ErrorType::Timeout, None, "connect timed out"),
            CheckMeta::None,
        ),
    }
}
