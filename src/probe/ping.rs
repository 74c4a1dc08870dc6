use crate::classify::{self, ErrorType};
use crate::model::{CheckMeta, CheckResult, Monitor};
use std::net::ToSocketAddrs;
use std::time::{Duration, Instant};
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};

/// ICMP echo probe with a TCP-connect fallback (to port 80, then 7) for
/// environments where raw sockets are unavailable (containers without
/// `CAP_NET_RAW`), per the protocol contract's documented fallback.
pub async fn check(monitor: &Monitor) -> CheckResult {
    let start = Instant::now();
    let host = monitor
        .target
        .strip_prefix("ping://")
        .unwrap_or(&monitor.target);

    let ip = resolve(host);
    let timeout = Duration::from_millis(monitor.timeout_ms as u64);

    let Some(ip) = ip else {
        return CheckResult::failure(
            start.elapsed().as_millis() as u32,
            ErrorType::PingHostUnreachable,
            classify::format_message(ErrorType::PingHostUnreachable, None, "could not resolve host"),
            CheckMeta::None,
        );
    };

    match icmp_echo(ip, timeout).await {
        Ok(()) => {
            return CheckResult::ok(
                start.elapsed().as_millis() as u32,
                None,
                CheckMeta::Ping { fallback_used: false },
            );
        }
        Err(_icmp_unavailable) => {}
    }

    match fallback_tcp(ip, timeout).await {
        Ok(()) => CheckResult::ok(
            start.elapsed().as_millis() as u32,
            None,
            CheckMeta::Ping { fallback_used: true },
        ),
        Err(_) => CheckResult::failure(
            start.elapsed().as_millis() as u32,
            ErrorType::PingTimeout,
            classify::format_message(ErrorType::PingTimeout, None, "no reply within timeout"),
            CheckMeta::Ping { fallback_used: true },
        ),
    }
}

fn resolve(host: &str) -> Option<std::net::IpAddr> {
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return Some(ip);
    }
    format!("{host}:0")
        .to_socket_addrs()
        .ok()
        .and_then(|mut it| it.next())
        .map(|a| a.ip())
}

async fn icmp_echo(ip: std::net::IpAddr, timeout: Duration) -> Result<(), ()> {
    let config = match ip {
        std::net::IpAddr::V4(_) => Config::builder().kind(ICMP::V4).build(),
        std::net::IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
    };
    let client = Client::new(&config).map_err(|_| ())?;
    let mut pinger = client
        .pinger(ip, PingIdentifier(rand::random()))
        .await;
    pinger.timeout(timeout);
    let payload = [0u8; 32];
    tokio::time::timeout(timeout, pinger.ping(PingSequence(0), &payload))
        .await
        .map_err(|_| ())?
        .map_err(|_| ())?;
    Ok(())
}

async fn fallback_tcp(ip: std::net::IpAddr, timeout: Duration) -> Result<(), ()> {
    for port in [80u16, 7u16] {
        let addr = std::net::SocketAddr::new(ip, port);
        if tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr))
            .await
            .is_ok_and(|r| r.is_ok())
        {
            return Ok(());
        }
    }
    Err(())
}
