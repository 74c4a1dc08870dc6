use super::degrade_on_slow;
use crate::classify::{self, ErrorType};
use crate::model::{CheckMeta, CheckResult, Monitor};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::{Name, TokioAsyncResolver};
use std::time::{Duration, Instant};

/// DNS resolution probe: resolves the configured record type and classifies
/// the outcome against the closed error taxonomy.
pub async fn check(monitor: &Monitor) -> CheckResult {
    let start = Instant::now();
    let hostname = monitor
        .target
        .strip_prefix("dns://")
        .unwrap_or(&monitor.target);
    let record_type = monitor
        .dns_record_type
        .as_deref()
        .unwrap_or("A")
        .to_uppercase();

    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

    let result = tokio::time::timeout(
        Duration::from_millis(monitor.timeout_ms as u64),
        lookup(&resolver, hostname, &record_type),
    )
    .await;
    let elapsed_ms = start.elapsed().as_millis() as u32;

    match result {
        Ok(Ok(values)) if values.is_empty() => CheckResult::failure(
            elapsed_ms,
            ErrorType::DnsNotFound,
            classify::format_message(
                ErrorType::DnsNotFound,
                None,
                &format!("no {record_type} records found for {hostname}"),
            ),
            CheckMeta::None,
        ),
        Ok(Ok(values)) => {
            if let Some(expected) = &monitor.dns_expected {
                let expected_lower = expected.to_lowercase();
                let matched = values.iter().any(|v| {
                    v.to_lowercase() == expected_lower
                        || v.to_lowercase().trim_end_matches('.') == expected_lower.trim_end_matches('.')
                });
                if !matched {
                    return CheckResult::failure(
                        elapsed_ms,
                        ErrorType::DnsNotFound,
                        classify::format_message(
                            ErrorType::DnsNotFound,
                            None,
                            &format!("expected '{expected}', got: {}", values.join(", ")),
                        ),
                        CheckMeta::Dns {
                            record_type,
                            resolved_values: values,
                        },
                    );
                }
            }
            degrade_on_slow(
                monitor.protocol,
                monitor.degraded_threshold_ms,
                elapsed_ms,
                None,
                CheckMeta::Dns {
                    record_type,
                    resolved_values: values,
                },
            )
        }
        Ok(Err(_)) => CheckResult::failure(
            elapsed_ms,
            ErrorType::DnsError,
            classify::format_message(ErrorType::DnsError, None, "resolver error"),
            CheckMeta::None,
        ),
        Err(_) => CheckResult::failure(
            elapsed_ms,
            ErrorType::DnsError,
            classify::format_message(ErrorType::DnsError, None, "lookup timed out"),
            CheckMeta::None,
        ),
    }
}

async fn lookup(
    resolver: &TokioAsyncResolver,
    hostname: &str,
    record_type: &str,
) -> Result<Vec<String>, String> {
    if let Ok(ip) = hostname.parse::<std::net::IpAddr>() {
        return Ok(vec![ip.to_string()]);
    }

    let name = Name::from_ascii(hostname).map_err(|e| format!("invalid hostname: {e}"))?;

    match record_type {
        "A" => {
            let r = resolver.ipv4_lookup(name).await.map_err(|e| e.to_string())?;
            Ok(r.iter().map(|ip| ip.to_string()).collect())
        }
        "AAAA" => {
            let r = resolver.ipv6_lookup(name).await.map_err(|e| e.to_string())?;
            Ok(r.iter().map(|ip| ip.to_string()).collect())
        }
        "MX" => {
            let r = resolver.mx_lookup(name).await.map_err(|e| e.to_string())?;
            Ok(r.iter()
                .map(|mx| format!("{} {}", mx.preference(), mx.exchange()))
                .collect())
        }
        "TXT" => {
            let r = resolver.txt_lookup(name).await.map_err(|e| e.to_string())?;
            Ok(r.iter().map(|txt| txt.to_string()).collect())
        }
        "NS" => {
            let r = resolver.ns_lookup(name).await.map_err(|e| e.to_string())?;
            Ok(r.iter().map(|ns| ns.to_string()).collect())
        }
        "SOA" => {
            let r = resolver.soa_lookup(name).await.map_err(|e| e.to_string())?;
            Ok(r.iter()
                .map(|soa| {
                    format!(
                        "{} {} {} {} {} {} {}",
                        soa.mname(),
                        soa.rname(),
                        soa.serial(),
                        soa.refresh(),
                        soa.retry(),
                        soa.expire(),
                        soa.minimum()
                    )
                })
                .collect())
        }
        "CNAME" | "PTR" | "SRV" | "CAA" => {
            let rtype = match record_type {
                "CNAME" => RecordType::CNAME,
                "PTR" => RecordType::PTR,
                "SRV" => RecordType::SRV,
                "CAA" => RecordType::CAA,
                _ => unreachable!(),
            };
            let r = resolver.lookup(name, rtype).await.map_err(|e| e.to_string())?;
            Ok(r.iter().map(|rec| rec.to_string()).collect())
        }
        other => Err(format!("unsupported record type: {other}")),
    }
}
