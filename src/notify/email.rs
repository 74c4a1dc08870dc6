use crate::model::{ChannelType, Incident, Monitor, NotificationChannel};
use lettre::message::Mailbox;
use lettre::transport::smtp::response::Response;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

const RETRY_DELAYS_MS: [u64; 3] = [1000, 2000, 4000];

/// Send to every configured email channel, retrying transient failures
/// (network errors, 5xx, 429, timeout) up to three times with exponential
/// backoff.
pub async fn send(
    channels: &[NotificationChannel],
    monitor: &Monitor,
    incident: &Incident,
    kind: &str,
) -> Result<(), String> {
    let addresses: Vec<String> = channels
        .iter()
        .filter(|c| c.channel_type == ChannelType::Email)
        .filter_map(|c| c.config.get("address").and_then(|v| v.as_str()).map(str::to_string))
        .collect();

    if addresses.is_empty() {
        return Ok(());
    }

    let from = std::env::var("SMTP_FROM_ADDRESS").unwrap_or_else(|_| "alerts@pulseward.local".to_string());
    let transport = build_transport().map_err(|e| format!("failed to build SMTP transport: {e}"))?;

    let mut last_error = None;
    let mut any_sent = false;
    for address in &addresses {
        match send_with_retry(&transport, &from, address, monitor, incident, kind).await {
            Ok(()) => any_sent = true,
            Err(e) => last_error = Some(e),
        }
    }

    if any_sent {
        Ok(())
    } else {
        Err(last_error.unwrap_or_else(|| "no email channels configured".to_string()))
    }
}

async fn send_with_retry(
    transport: &AsyncSmtpTransport<Tokio1Executor>,
    from: &str,
    to: &str,
    monitor: &Monitor,
    incident: &Incident,
    kind: &str,
) -> Result<(), String> {
    let message = build_message(from, to, monitor, incident, kind)?;

    let mut attempt = 0;
    loop {
        match transport.send(message.clone()).await {
            Ok(_) => return Ok(()),
            Err(e) if attempt < RETRY_DELAYS_MS.len() && is_retryable(&e) => {
                tokio::time::sleep(Duration::from_millis(RETRY_DELAYS_MS[attempt])).await;
                attempt += 1;
            }
            Err(e) => return Err(e.to_string()),
        }
    }
}

fn is_retryable(e: &lettre::transport::smtp::Error) -> bool {
    e.is_transient() || e.is_timeout()
}

fn build_message(
    from: &str,
    to: &str,
    monitor: &Monitor,
    incident: &Incident,
    kind: &str,
) -> Result<Message, String> {
    let from: Mailbox = from.parse().map_err(|e| format!("invalid from address: {e}"))?;
    let to: Mailbox = to.parse().map_err(|e| format!("invalid to address: {e}"))?;

    let subject = match kind {
        "recovery" => format!("[recovered] {}", monitor.name),
        _ => format!("[{}] {}", monitor.current_state, monitor.name),
    };
    let body = format!(
        "Monitor: {}\nTarget: {}\nStatus: {}\nDetail: {}\n",
        monitor.name,
        monitor.target,
        monitor.current_state,
        incident.error_message.as_deref().unwrap_or("-"),
    );

    Message::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .body(body)
        .map_err(|e| format!("failed to build message: {e}"))
}

fn build_transport() -> Result<AsyncSmtpTransport<Tokio1Executor>, String> {
    let host = std::env::var("SMTP_HOST").map_err(|_| "SMTP_HOST not configured".to_string())?;
    let username = std::env::var("SMTP_USERNAME").ok();
    let password = std::env::var("SMTP_PASSWORD").ok();

    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
        .map_err(|e| e.to_string())?
        .timeout(Some(Duration::from_secs(10)));

    if let (Some(username), Some(password)) = (username, password) {
        builder = builder.credentials(lettre::transport::smtp::authentication::Credentials::new(
            username, password,
        ));
    }

    Ok(builder.build())
}

#[allow(dead_code)]
fn log_response(response: &Response) {
    tracing::debug!("email: SMTP response {:?}", response.code());
}
