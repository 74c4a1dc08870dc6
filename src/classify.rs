//! Pure error classifier (component B). Maps low-level probe outcomes to a
//! closed taxonomy that the evaluator and alert engine can exhaustively
//! match on, instead of string-keyed error codes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    HttpSuccess,
    HttpRedirect,
    HttpInformational,
    HttpRateLimit,
    HttpClientError,
    HttpUnauthorized,
    HttpForbidden,
    HttpNotFound,
    HttpBadRequest,
    HttpServerError,
    ConnectionRefused,
    Timeout,
    DnsNotFound,
    DnsError,
    UdpTimeout,
    UdpResponseMismatch,
    CertExpired,
    CertHasExpired,
    CertNotYetValid,
    CertHostnameMismatch,
    CertUntrusted,
    SelfSignedCert,
    SslInvalid,
    PingTimeout,
    PingHostUnreachable,
    ProtocolMismatch,
    MalformedStructure,
    InvalidUrl,
    MissingTarget,
}

/// Coarse severity used by the evaluator's rule ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl ErrorType {
    /// Whether this error type, on its own, is severe enough to force a
    /// DOWN candidate state regardless of latency/SSL/4xx rules.
    pub fn down_severity(&self) -> Option<Severity> {
        use ErrorType::*;
        match self {
            HttpServerError | ConnectionRefused | Timeout | DnsNotFound | DnsError
            | UdpTimeout | CertExpired | CertHasExpired | SslInvalid | CertUntrusted
            | SelfSignedCert | CertHostnameMismatch | PingTimeout | PingHostUnreachable
            | ProtocolMismatch | MalformedStructure | InvalidUrl | MissingTarget
            | UdpResponseMismatch | CertNotYetValid => Some(Severity::High),
            HttpRateLimit | HttpClientError | HttpUnauthorized | HttpForbidden
            | HttpNotFound | HttpBadRequest => None,
            HttpSuccess | HttpRedirect | HttpInformational => None,
        }
    }

    /// User-facing message prefix, e.g. "HTTP: " / "SSL: ".
    pub fn protocol_prefix(&self) -> &'static str {
        use ErrorType::*;
        match self {
            HttpSuccess | HttpRedirect | HttpInformational | HttpRateLimit | HttpClientError
            | HttpUnauthorized | HttpForbidden | HttpNotFound | HttpBadRequest
            | HttpServerError => "HTTP",
            ConnectionRefused | Timeout => "TCP",
            DnsNotFound | DnsError => "DNS",
            UdpTimeout | UdpResponseMismatch => "UDP",
            CertExpired | CertHasExpired | CertNotYetValid | CertHostnameMismatch
            | CertUntrusted | SelfSignedCert | SslInvalid => "SSL",
            PingTimeout | PingHostUnreachable => "PING",
            ProtocolMismatch | MalformedStructure | InvalidUrl | MissingTarget => "TARGET",
        }
    }
}

/// Resolves the monitor's configured `degraded_threshold_ms` against its
/// protocol's default, returning `None` when the slow-response rule is
/// disabled outright (an explicit `0`, not merely unset).
pub fn effective_threshold(
    protocol: crate::model::Protocol,
    degraded_threshold_ms: Option<u32>,
) -> Option<u32> {
    use crate::model::Protocol::*;
    match degraded_threshold_ms {
        Some(0) => None,
        Some(configured) => Some(configured),
        None => Some(match protocol {
            Http | Https => 5000,
            Ping => 1500,
            Tcp | Udp | Smtp | Ssl => 3000,
            Dns => 2000,
        }),
    }
}

/// Classify an HTTP status code into `(errorType, isUp, isDegraded)`.
pub fn classify_http_status(status: u16) -> (Option<ErrorType>, bool, bool) {
    match status {
        100..=199 => (Some(ErrorType::HttpInformational), true, false),
        200..=299 => (None, true, false),
        300..=399 => (Some(ErrorType::HttpRedirect), true, false),
        429 => (Some(ErrorType::HttpRateLimit), false, true),
        400 => (Some(ErrorType::HttpBadRequest), false, true),
        401 => (Some(ErrorType::HttpUnauthorized), false, true),
        403 => (Some(ErrorType::HttpForbidden), false, true),
        404 => (Some(ErrorType::HttpNotFound), false, true),
        405..=499 => (Some(ErrorType::HttpClientError), false, true),
        500..=599 => (Some(ErrorType::HttpServerError), false, false),
        _ => (Some(ErrorType::HttpClientError), false, true),
    }
}

/// User-facing message for a classified error, e.g. `"HTTP: 404 Not Found"`.
pub fn format_message(error_type: ErrorType, status_code: Option<u16>, detail: &str) -> String {
    let prefix = error_type.protocol_prefix();
    match status_code {
        Some(code) => format!("{prefix}: {code} — {detail}"),
        None => format!("{prefix}: {detail}"),
    }
}

/// Pre-probe target validation. Returns `Err(ErrorType)` describing why the
/// target can never be probed, without attempting any I/O.
pub fn validate_target(protocol: crate::model::Protocol, target: &str) -> Result<(), ErrorType> {
    use crate::model::Protocol::*;

    let trimmed = target.trim();
    if trimmed.is_empty() {
        return Err(ErrorType::MissingTarget);
    }

    match protocol {
        Http | Https => {
            let url = url_lite::parse(trimmed).ok_or(ErrorType::MalformedStructure)?;
            let scheme_ok = matches!(url.scheme.as_str(), "http" | "https");
            if !scheme_ok {
                return Err(ErrorType::ProtocolMismatch);
            }
            if url.host.is_empty() {
                return Err(ErrorType::InvalidUrl);
            }
            if let Some(port) = url.port {
                if port == 0 {
                    return Err(ErrorType::InvalidUrl);
                }
            }
            Ok(())
        }
        Tcp | Udp => {
            let addr = trimmed
                .strip_prefix("tcp://")
                .or_else(|| trimmed.strip_prefix("udp://"))
                .unwrap_or(trimmed);
            let mut parts = addr.rsplitn(2, ':');
            let port_part = parts.next();
            let host_part = parts.next();
            match (host_part, port_part.and_then(|p| p.parse::<u32>().ok())) {
                (Some(h), Some(p)) if !h.is_empty() && p > 0 && p <= 65535 => Ok(()),
                _ => Err(ErrorType::InvalidUrl),
            }
        }
        Dns => {
            let host = trimmed.strip_prefix("dns://").unwrap_or(trimmed);
            if host.is_empty() || host.contains(' ') || host.contains("://") {
                return Err(ErrorType::MalformedStructure);
            }
            Ok(())
        }
        Smtp | Ssl | Ping => Ok(()),
    }
}

/// Minimal dependency-free URL parsing sufficient for validation — the probe
/// itself uses `reqwest`'s own parser; this exists purely to reject obviously
/// malformed targets before any network I/O happens.
mod url_lite {
    pub struct Parsed {
        pub scheme: String,
        pub host: String,
        pub port: Option<u32>,
    }

    pub fn parse(s: &str) -> Option<Parsed> {
        let (scheme, rest) = s.split_once("://")?;
        if rest.is_empty() {
            return None;
        }
        let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
        // An empty authority (e.g. "http:///path") is a structurally valid
        // split with no host — let it through as `host: ""` so callers can
        // reject it as InvalidUrl rather than MalformedStructure.
        // strip userinfo
        let authority = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
        let (host, port) = if let Some(stripped) = authority.strip_prefix('[') {
            // IPv6 literal [::1]:8080
            let (host, after) = stripped.split_once(']')?;
            let port = after.strip_prefix(':').and_then(|p| p.parse::<u32>().ok());
            (host.to_string(), port)
        } else if let Some((h, p)) = authority.rsplit_once(':') {
            match p.parse::<u32>() {
                Ok(port) => (h.to_string(), Some(port)),
                Err(_) => (authority.to_string(), None),
            }
        } else {
            (authority.to_string(), None)
        };
        Some(Parsed { scheme: scheme.to_string(), host, port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Protocol;

    #[test]
    fn classifies_http_status_families() {
        assert_eq!(classify_http_status(200).1, true);
        assert_eq!(classify_http_status(404).0, Some(ErrorType::HttpNotFound));
        assert_eq!(classify_http_status(404).2, true);
        assert_eq!(classify_http_status(500).1, false);
        assert_eq!(classify_http_status(500).2, false);
        assert_eq!(classify_http_status(429).0, Some(ErrorType::HttpRateLimit));
    }

    #[test]
    fn down_severity_classification() {
        assert_eq!(ErrorType::HttpServerError.down_severity(), Some(Severity::High));
        assert_eq!(ErrorType::HttpClientError.down_severity(), None);
        assert_eq!(ErrorType::CertHasExpired.down_severity(), Some(Severity::High));
    }

    #[test]
    fn rejects_empty_target() {
        assert_eq!(validate_target(Protocol::Http, "   "), Err(ErrorType::MissingTarget));
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert_eq!(
            validate_target(Protocol::Http, "ftp://example.com"),
            Err(ErrorType::ProtocolMismatch)
        );
    }

    #[test]
    fn rejects_empty_host() {
        assert_eq!(validate_target(Protocol::Http, "http:///path"), Err(ErrorType::InvalidUrl));
    }

    #[test]
    fn accepts_valid_http_url() {
        assert_eq!(validate_target(Protocol::Https, "https://example.com:8443/health"), Ok(()));
    }

    #[test]
    fn rejects_invalid_tcp_port() {
        assert_eq!(validate_target(Protocol::Tcp, "example.com:0"), Err(ErrorType::InvalidUrl));
        assert_eq!(validate_target(Protocol::Tcp, "example.com:99999"), Err(ErrorType::InvalidUrl));
    }

    #[test]
    fn accepts_valid_tcp_target() {
        assert_eq!(validate_target(Protocol::Tcp, "tcp://example.com:443"), Ok(()));
    }

    #[test]
    fn effective_threshold_falls_back_to_protocol_default() {
        assert_eq!(effective_threshold(Protocol::Http, None), Some(5000));
        assert_eq!(effective_threshold(Protocol::Https, None), Some(5000));
        assert_eq!(effective_threshold(Protocol::Ping, None), Some(1500));
        assert_eq!(effective_threshold(Protocol::Tcp, None), Some(3000));
        assert_eq!(effective_threshold(Protocol::Udp, None), Some(3000));
        assert_eq!(effective_threshold(Protocol::Smtp, None), Some(3000));
        assert_eq!(effective_threshold(Protocol::Ssl, None), Some(3000));
        assert_eq!(effective_threshold(Protocol::Dns, None), Some(2000));
    }

    #[test]
    fn effective_threshold_honours_explicit_configuration() {
        assert_eq!(effective_threshold(Protocol::Http, Some(9000)), Some(9000));
    }

    #[test]
    fn effective_threshold_zero_disables_the_rule() {
        assert_eq!(effective_threshold(Protocol::Http, Some(0)), None);
    }
}
