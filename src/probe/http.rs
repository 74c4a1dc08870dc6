use super::degrade_on_slow;
use crate::classify::{self, ErrorType};
use crate::model::{CheckMeta, CheckResult, Monitor};
use std::time::{Duration, Instant};

/// HTTP/HTTPS probe: issues the request, classifies the status code and any
/// transport error against the closed error taxonomy, and records redirect
/// metadata.
pub async fn check(client: &reqwest::Client, monitor: &Monitor) -> CheckResult {
    let start = Instant::now();

    let request = client
        .get(&monitor.target)
        .timeout(Duration::from_millis(monitor.timeout_ms as u64));

    let response = request.send().await;
    let elapsed_ms = start.elapsed().as_millis() as u32;

    match response {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let final_url = resp.url().to_string();
            let redirect_count = resp.url().as_str().ne(&monitor.target) as u32;
            let (error_type, is_up, _is_degraded) = classify::classify_http_status(status);

            let meta = CheckMeta::Http {
                final_url: Some(final_url),
                redirect_count,
            };

            if !is_up {
                let detail = http_status_detail(status);
                let error_type = error_type.unwrap_or(ErrorType::HttpClientError);
                return CheckResult::failure(
                    elapsed_ms,
                    error_type,
                    classify::format_message(error_type, Some(status), detail),
                    meta,
                );
            }

            if let Some(expected) = &monitor.body_contains {
                match resp.text().await {
                    Ok(body) if body.contains(expected.as_str()) => {}
                    Ok(_) => {
                        return CheckResult::failure(
                            elapsed_ms,
                            ErrorType::HttpClientError,
                            classify::format_message(
                                ErrorType::HttpClientError,
                                Some(status),
                                "response body did not contain expected text",
                            ),
                            meta,
                        );
                    }
                    Err(e) => {
                        return CheckResult::failure(
                            elapsed_ms,
                            ErrorType::HttpClientError,
                            classify::format_message(
                                ErrorType::HttpClientError,
                                Some(status),
                                &format!("failed reading response body: {e}"),
                            ),
                            meta,
                        );
                    }
                }
            }

            degrade_on_slow(monitor.protocol, monitor.degraded_threshold_ms, elapsed_ms, Some(status), meta)
        }
        Err(e) => {
            let error_type = if e.is_timeout() {
                ErrorType::Timeout
            } else if e.is_connect() {
                ErrorType::ConnectionRefused
            } else if e.is_redirect() {
                // Exhausted the redirect policy's limit — treat as a hard failure.
                ErrorType::HttpServerError
            } else {
                ErrorType::ConnectionRefused
            };
            CheckResult::failure(
                elapsed_ms,
                error_type,
                classify::format_message(error_type, None, &request_error_detail(&e)),
                CheckMeta::None,
            )
        }
    }
}

fn http_status_detail(status: u16) -> &'static str {
    match status {
        400 => "bad request",
        401 => "unauthorized",
        403 => "forbidden",
        404 => "not found",
        429 => "rate limited",
        405..=499 => "client error",
        500..=599 => "server error",
        _ => "unexpected status",
    }
}

fn request_error_detail(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        "connection refused".to_string()
    } else {
        format!("request failed: {e}")
    }
}
