use super::validate_outbound_url;
use crate::model::{ChannelType, Incident, Monitor, NotificationChannel};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct SlackPayload {
    text: String,
}

pub async fn send(
    channels: &[NotificationChannel],
    monitor: &Monitor,
    incident: &Incident,
    kind: &str,
) -> Result<(), String> {
    let urls: Vec<String> = channels
        .iter()
        .filter(|c| c.channel_type == ChannelType::Slack)
        .filter_map(|c| c.config.get("url").and_then(|v| v.as_str()).map(str::to_string))
        .collect();

    if urls.is_empty() {
        return Ok(());
    }

    let text = match kind {
        "recovery" => format!(":white_check_mark: *{}* has recovered", monitor.name),
        _ => format!(
            ":rotating_light: *{}* is {} — {}",
            monitor.name,
            monitor.current_state,
            incident.error_message.as_deref().unwrap_or("no detail")
        ),
    };
    let payload = SlackPayload { text };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| e.to_string())?;

    let mut any_sent = false;
    let mut last_error = None;
    for url in &urls {
        if let Err(e) = validate_outbound_url(url) {
            last_error = Some(e);
            continue;
        }
        match client.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => any_sent = true,
            Ok(resp) => last_error = Some(format!("slack returned {}", resp.status())),
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    if any_sent {
        Ok(())
    } else {
        Err(last_error.unwrap_or_else(|| "no slack channels configured".to_string()))
    }
}
