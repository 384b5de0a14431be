//! Configuration commands.

use std::path::Path;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::secret;

const REDACTED: &str = "********";

/// Dump the effective configuration to stdout. Inline tokens are masked.
pub fn dump(config: &ClientConfig, path: &Path) -> ClientResult<()> {
    println!("# config.toml ({})", path.display());
    println!("{}", render(config)?);
    Ok(())
}

fn render(config: &ClientConfig) -> ClientResult<String> {
    let mut shown = config.clone();
    if let Some(token) = shown.server.token.as_mut() {
        if !secret::is_reference(token) {
            *token = REDACTED.to_string();
        }
    }
    toml::to_string_pretty(&shown)
        .map_err(|e| ClientError::Usage(format!("failed to serialize config: {}", e)))
}

/// Validate the configuration, including the token reference.
pub fn validate(config: &ClientConfig) -> ClientResult<()> {
    config.validate()?;
    if config.server.token.is_some() {
        config.transport_config()?;
        println!("Token reference resolves.");
    }
    println!("Configuration is valid.");
    Ok(())
}

/// Show the configuration file path.
pub fn path(path: &Path) -> ClientResult<()> {
    println!("config: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_token_is_masked() {
        let mut config = ClientConfig::default();
        config.server.token = Some("hunter2".to_string());
        let text = render(&config).unwrap();
        assert!(!text.contains("hunter2"));
        assert!(text.contains(REDACTED));
    }

    #[test]
    fn token_reference_is_shown() {
        let mut config = ClientConfig::default();
        config.server.token = Some("env::LINKCALL_TOKEN".to_string());
        let text = render(&config).unwrap();
        assert!(text.contains("env::LINKCALL_TOKEN"));
    }

    #[test]
    fn validate_reports_invalid_values() {
        let mut config = ClientConfig::default();
        config.server.url = "not a url".to_string();
        assert!(matches!(validate(&config), Err(ClientError::Config(_))));
    }
}
