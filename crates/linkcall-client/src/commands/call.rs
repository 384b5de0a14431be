//! `linkcall call`: one request, one response.

use serde_json::{Map, Value};
use tracing::debug;

use crate::client::Client;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Connect, send `api/<route>` with `payload`, print the response payload.
pub async fn run(config: &ClientConfig, route: &str, payload: &str) -> ClientResult<()> {
    let payload = parse_payload(payload)?;
    let url = config.server_url()?;

    let client = Client::from_config(config, None)?;
    client.connect(&url).await?;
    debug!(route, "sending request");

    let result = client.call(route, payload).await;
    client.disconnect().await;
    let response = result?;

    let body = Value::Object(response.payload.unwrap_or_default());
    let text = serde_json::to_string_pretty(&body)
        .map_err(|e| ClientError::Usage(format!("failed to render response: {}", e)))?;
    println!("{}", text);
    Ok(())
}

fn parse_payload(text: &str) -> ClientResult<Map<String, Value>> {
    match serde_json::from_str(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ClientError::Usage(
            "--payload must be a JSON object".to_string(),
        )),
        Err(e) => Err(ClientError::Usage(format!("invalid --payload: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_must_be_an_object() {
        let map = parse_payload(r#"{"username":"ada","password":"pw"}"#).unwrap();
        assert_eq!(map["username"], "ada");

        assert!(parse_payload("{}").unwrap().is_empty());
        assert!(matches!(parse_payload("[1,2]"), Err(ClientError::Usage(_))));
        assert!(matches!(parse_payload("{oops"), Err(ClientError::Usage(_))));
    }
}
