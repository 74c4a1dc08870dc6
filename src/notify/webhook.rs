use super::validate_outbound_url;
use crate::model::{ChannelType, Incident, Monitor, NotificationChannel};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    event: &'a str,
    monitor: WebhookMonitor<'a>,
    incident: WebhookIncident<'a>,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct WebhookMonitor<'a> {
    id: &'a str,
    name: &'a str,
    target: &'a str,
    current_status: String,
}

#[derive(Debug, Serialize)]
struct WebhookIncident<'a> {
    id: &'a str,
    error_message: Option<&'a str>,
    started_at: String,
}

pub async fn send(
    channels: &[NotificationChannel],
    monitor: &Monitor,
    incident: &Incident,
    kind: &str,
) -> Result<(), String> {
    let urls: Vec<String> = channels
        .iter()
        .filter(|c| c.channel_type == ChannelType::Webhook)
        .filter_map(|c| c.config.get("url").and_then(|v| v.as_str()).map(str::to_string))
        .collect();

    if urls.is_empty() {
        return Ok(());
    }

    let payload = WebhookPayload {
        event: kind,
        monitor: WebhookMonitor {
            id: &monitor.id,
            name: &monitor.name,
            target: &monitor.target,
            current_status: monitor.current_state.to_string(),
        },
        incident: WebhookIncident {
            id: &incident.id,
            error_message: incident.error_message.as_deref(),
            started_at: incident.start_time.to_rfc3339(),
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| e.to_string())?;

    let mut last_error = None;
    let mut any_sent = false;
    for url in &urls {
        if let Err(e) = validate_outbound_url(url) {
            last_error = Some(e);
            continue;
        }
        match client.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => any_sent = true,
            Ok(resp) => last_error = Some(format!("webhook returned {}", resp.status())),
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    if any_sent {
        Ok(())
    } else {
        Err(last_error.unwrap_or_else(|| "no webhook channels configured".to_string()))
    }
}
