//! `linkcall listen`: stay connected and print notifications until Ctrl-C.

use chrono::{DateTime, Local};
use linkcall_core::Notification;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::client::Client;
use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::transport::ConnectionSnapshot;

pub async fn run(config: &ClientConfig, json_lines: bool) -> ClientResult<()> {
    let url = config.server_url()?;
    let client = Client::from_config(config, None)?;
    let mut notifications = client.subscribe();
    let mut connection = client.watch_connection();

    client.connect(&url).await?;
    info!("listening, press Ctrl-C to stop");

    loop {
        tokio::select! {
            received = notifications.recv() => match received {
                Ok(notification) => {
                    println!("{}", render(&notification, Local::now(), json_lines));
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "notifications dropped"),
                Err(RecvError::Closed) => break,
            },

            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = connection.borrow_and_update().clone();
                eprintln!("{}", render_connection(&snapshot, Local::now()));
            }

            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

/// Notification details as JSON.
fn details(notification: &Notification) -> Value {
    match notification {
        Notification::Unauthorized | Notification::StreamsCleared => Value::Null,
        Notification::Broadcast { name, payload } => json!({ "name": name, "payload": payload }),
        Notification::CallOffer {
            from, call_type, ..
        } => json!({ "from": from, "callType": call_type }),
        Notification::CallAnswer { answer } => json!({ "type": answer.kind }),
        Notification::IceCandidate { candidate } => json!({ "candidate": candidate.candidate }),
        Notification::RemoteStreamUpdated { stream_id }
        | Notification::LocalStreamUpdated { stream_id } => json!({ "streamId": stream_id }),
        Notification::CallEnded { reason } => json!({ "reason": reason }),
    }
}

fn render(notification: &Notification, at: DateTime<Local>, json_lines: bool) -> String {
    let details = details(notification);
    if json_lines {
        return json!({
            "time": at.to_rfc3339(),
            "notification": notification.name(),
            "details": details,
        })
        .to_string();
    }

    let time = at.format("%H:%M:%S");
    match details {
        Value::Null => format!("{} {}", time, notification.name()),
        details => format!("{} {} {}", time, notification.name(), details),
    }
}

fn render_connection(snapshot: &ConnectionSnapshot, at: DateTime<Local>) -> String {
    let mut line = format!("{} link {:?}", at.format("%H:%M:%S"), snapshot.state);
    if snapshot.reconnect_attempt > 0 {
        line.push_str(&format!(" (attempt {})", snapshot.reconnect_attempt));
    }
    if snapshot.established {
        line.push_str(" established");
    }
    line
}
