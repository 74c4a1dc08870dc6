use super::validate_outbound_url;
use crate::model::{ChannelType, Incident, Monitor, NotificationChannel};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct SmsPayload<'a> {
    to: &'a str,
    body: String,
}

/// Sends via a generic SMS gateway webhook — provider-agnostic, the same
/// way the webhook channel posts JSON to a configured URL, except the
/// destination phone number travels alongside the message body.
pub async fn send(
    channels: &[NotificationChannel],
    monitor: &Monitor,
    incident: &Incident,
    kind: &str,
) -> Result<(), String> {
    let targets: Vec<(String, String)> = channels
        .iter()
        .filter(|c| c.channel_type == ChannelType::Sms)
        .filter_map(|c| {
            let number = c.config.get("number").and_then(|v| v.as_str())?;
            let gateway_url = c.config.get("gateway_url").and_then(|v| v.as_str())?;
            Some((number.to_string(), gateway_url.to_string()))
        })
        .collect();

    if targets.is_empty() {
        return Ok(());
    }

    let body = match kind {
        "recovery" => format!("{} has recovered", monitor.name),
        _ => format!(
            "{} is {}: {}",
            monitor.name,
            monitor.current_state,
            incident.error_message.as_deref().unwrap_or("no detail")
        ),
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| e.to_string())?;

    let mut any_sent = false;
    let mut last_error = None;
    for (number, gateway_url) in &targets {
        if let Err(e) = validate_outbound_url(gateway_url) {
            last_error = Some(e);
            continue;
        }
        let payload = SmsPayload { to: number, body: body.clone() };
        match client.post(gateway_url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => any_sent = true,
            Ok(resp) => last_error = Some(format!("sms gateway returned {}", resp.status())),
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    if any_sent {
        Ok(())
    } else {
        Err(last_error.unwrap_or_else(|| "no sms channels configured".to_string()))
    }
}
