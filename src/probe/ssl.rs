use crate::classify::{self, ErrorType};
use crate::model::{CheckMeta, CheckResult, Monitor};
use rustls_pki_types::{CertificateDer, ServerName};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// TLS handshake + certificate inspection probe: connects, completes the
/// handshake, and reads the leaf certificate's validity window and subject.
pub async fn check(monitor: &Monitor) -> CheckResult {
    let start = Instant::now();
    let host = monitor
        .target
        .strip_prefix("ssl://")
        .or_else(|| monitor.target.strip_prefix("https://"))
        .unwrap_or(&monitor.target)
        .split('/')
        .next()
        .unwrap_or(&monitor.target);
    let port = monitor.port.unwrap_or(443);
    let addr = format!("{host}:{port}");
    let host_only = host.split(':').next().unwrap_or(host).to_string();

    let outcome = tokio::time::timeout(
        Duration::from_millis(monitor.timeout_ms as u64),
        inspect(&addr, &host_only),
    )
    .await;
    let elapsed_ms = start.elapsed().as_millis() as u32;

    let cert_info = match outcome {
        Ok(Ok(info)) => info,
        Ok(Err(error_type)) => {
            return CheckResult::failure(
                elapsed_ms,
                error_type,
                classify::format_message(error_type, None, error_type.protocol_prefix()),
                CheckMeta::None,
            );
        }
        Err(_) => {
            return CheckResult::failure(
                elapsed_ms,
                ErrorType::Timeout,
                classify::format_message(ErrorType::Timeout, None, "TLS handshake timed out"),
                CheckMeta::None,
            );
        }
    };

    let threshold_days = monitor.ssl_expiry_threshold_days as i64;
    let meta = CheckMeta::Ssl {
        valid_from: cert_info.valid_from,
        valid_to: cert_info.valid_to,
        days_remaining: cert_info.days_remaining,
        subject: cert_info.subject.clone(),
    };

    if cert_info.days_remaining <= 0 {
        return CheckResult::failure(
            elapsed_ms,
            ErrorType::CertHasExpired,
            classify::format_message(
                ErrorType::CertHasExpired,
                None,
                &format!("certificate expired {} days ago", -cert_info.days_remaining),
            ),
            meta,
        );
    }

    let mut result = CheckResult::ok(elapsed_ms, None, meta);
    if cert_info.days_remaining <= threshold_days {
        result.error_message = Some(format!(
            "certificate expires in {} days (threshold {threshold_days})",
            cert_info.days_remaining
        ));
    }
    result
}

struct CertInfo {
    valid_from: chrono::DateTime<chrono::Utc>,
    valid_to: chrono::DateTime<chrono::Utc>,
    days_remaining: i64,
    subject: Option<String>,
}

async fn inspect(addr: &str, sni_host: &str) -> Result<CertInfo, ErrorType> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));

    let server_name = ServerName::try_from(sni_host.to_string())
        .map_err(|_| ErrorType::CertHostnameMismatch)?;

    let tcp = TcpStream::connect(addr)
        .await
        .map_err(|_| ErrorType::ConnectionRefused)?;

    let tls_stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(classify_tls_error)?;

    let (_, session) = tls_stream.get_ref();
    let chain = session
        .peer_certificates()
        .ok_or(ErrorType::SslInvalid)?;
    let leaf = chain.first().ok_or(ErrorType::SslInvalid)?;

    parse_certificate(leaf)
}

fn classify_tls_error(e: std::io::Error) -> ErrorType {
    let msg = e.to_string().to_lowercase();
    if msg.contains("expired") {
        ErrorType::CertExpired
    } else if msg.contains("not valid yet") || msg.contains("notbefore") {
        ErrorType::CertNotYetValid
    } else if msg.contains("selfsigned") || msg.contains("self signed") || msg.contains("self-signed") {
        ErrorType::SelfSignedCert
    } else if msg.contains("hostname") || msg.contains("name mismatch") || msg.contains("notvalidforname") {
        ErrorType::CertHostnameMismatch
    } else if msg.contains("unknownissuer") || msg.contains("untrusted") {
        ErrorType::CertUntrusted
    } else {
        ErrorType::SslInvalid
    }
}

fn parse_certificate(der: &CertificateDer<'_>) -> Result<CertInfo, ErrorType> {
    let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref())
        .map_err(|_| ErrorType::SslInvalid)?;
    let validity = cert.validity();

    let valid_from = chrono::DateTime::from_timestamp(validity.not_before.timestamp(), 0)
        .ok_or(ErrorType::SslInvalid)?;
    let valid_to = chrono::DateTime::from_timestamp(validity.not_after.timestamp(), 0)
        .ok_or(ErrorType::SslInvalid)?;
    let days_remaining = (valid_to - chrono::Utc::now()).num_days();

    let subject = cert.subject().to_string();

    Ok(CertInfo {
        valid_from,
        valid_to,
        days_remaining,
        subject: Some(subject),
    })
}
