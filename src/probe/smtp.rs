use crate::classify::{self, ErrorType};
use crate::model::{CheckMeta, CheckResult, Monitor};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// SMTP banner/handshake probe: connect, read the 220 greeting, EHLO, QUIT.
/// Anything short of a well-formed 2xx banner is a hard failure.
pub async fn check(monitor: &Monitor) -> CheckResult {
    let start = Instant::now();
    let addr = monitor
        .target
        .strip_prefix("smtp://")
        .unwrap_or(&monitor.target);
    let addr = if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{addr}:{}", monitor.port.unwrap_or(25))
    };

    let outcome = tokio::time::timeout(
        Duration::from_millis(monitor.timeout_ms as u64),
        handshake(&addr),
    )
    .await;
    let elapsed_ms = start.elapsed().as_millis() as u32;

    match outcome {
        Ok(Ok(banner)) => CheckResult::ok(elapsed_ms, None, CheckMeta::Smtp { banner: Some(banner) }),
        Ok(Err(message)) => CheckResult::failure(
            elapsed_ms,
            ErrorType::ConnectionRefused,
            classify::format_message(ErrorType::ConnectionRefused, None, &message),
            CheckMeta::None,
        ),
        Err(_) => CheckResult::failure(
            elapsed_ms,
            ErrorType::Timeout,
            classify::format_message(ErrorType::Timeout, None, "SMTP handshake timed out"),
            CheckMeta::None,
        ),
    }
}

async fn handshake(addr: &str) -> Result<String, String> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| format!("connect failed: {e}"))?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut banner = String::new();
    reader
        .read_line(&mut banner)
        .await
        .map_err(|e| format!("failed to read banner: {e}"))?;
    if !banner.starts_with("220") {
        return Err(format!("unexpected banner: {}", banner.trim()));
    }

    write_half
        .write_all(b"EHLO pulseward.local\r\n")
        .await
        .map_err(|e| format!("EHLO failed: {e}"))?;
    let mut ehlo_reply = String::new();
    reader
        .read_line(&mut ehlo_reply)
        .await
        .map_err(|e| format!("failed to read EHLO reply: {e}"))?;
    if !ehlo_reply.starts_with('2') {
        return Err(format!("EHLO rejected: {}", ehlo_reply.trim()));
    }

    let _ = write_half.write_all(b"QUIT\r\n").await;
    Ok(banner.trim().to_string())
}
