use crate::classify::{self, ErrorType};
use crate::model::{CheckMeta, CheckResult, Monitor};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

/// UDP probe. Connectionless by nature, so "up" is best-effort: a reply
/// within the timeout (matching the expected payload when configured)
/// counts as up; silence counts as down, never as a hard error, since a
/// dropped datagram is indistinguishable from an unreachable target.
pub async fn check(monitor: &Monitor) -> CheckResult {
    let start = Instant::now();
    let addr = monitor
        .target
        .strip_prefix("udp://")
        .unwrap_or(&monitor.target);

    let probe_payload = monitor
        .udp_expected_response
        .as_deref()
        .unwrap_or("ping")
        .as_bytes();

    let outcome = send_and_wait(addr, probe_payload, monitor.timeout_ms).await;
    let elapsed_ms = start.elapsed().as_millis() as u32;

    match outcome {
        Ok(received) => {
            let matched = monitor
                .udp_expected_response
                .as_ref()
                .map(|expected| received == *expected)
                .unwrap_or(true);
            if matched {
                CheckResult::ok(
                    elapsed_ms,
                    None,
                    CheckMeta::Udp {
                        reliability: "best-effort",
                    },
                )
            } else {
                CheckResult::failure(
                    elapsed_ms,
                    ErrorType::UdpResponseMismatch,
                    classify::format_message(
                        ErrorType::UdpResponseMismatch,
                        None,
                        "reply did not match expected payload",
                    ),
                    CheckMeta::Udp {
                        reliability: "best-effort",
                    },
                )
            }
        }
        Err(_) => CheckResult::failure(
            elapsed_ms,
            ErrorType::UdpTimeout,
            classify::format_message(
                ErrorType::UdpTimeout,
                None,
                "no reply within timeout (UDP is connectionless — this may be a false negative)",
            ),
            CheckMeta::Udp {
                reliability: "best-effort",
            },
        ),
    }
}

async fn send_and_wait(addr: &str, payload: &[u8], timeout_ms: u32) -> std::io::Result<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(addr).await?;
    socket.send(payload).await?;

    let mut buf = [0u8; 512];
    let len = tokio::time::timeout(
        Duration::from_millis(timeout_ms as u64),
        socket.recv(&mut buf),
    )
    .await
    .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "no reply"))??;

    Ok(String::from_utf8_lossy(&buf[..len]).to_string())
}
