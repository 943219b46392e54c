//! Geolocation of the target host through public country lookup services.
//!
//! Each endpoint is queried from the target itself with `curl`, so the answer reflects
//! the host's network location rather than the orchestrator's.

use super::probe::{CommandProbe, ProbeCascade};
use crate::constants::UNKNOWN;
use crate::context::ExecutionContext;
use crate::error::Result;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

/// Shell command querying one endpoint with a hard time limit
pub fn geo_command(endpoint: &str, timeout: Duration) -> String {
    format!(
        "curl -fsSL --max-time {} '{}' 2>/dev/null",
        timeout.as_secs().max(1),
        endpoint.replace('\'', "")
    )
}

pub fn geo_cascade(endpoints: &[String], timeout: Duration) -> ProbeCascade {
    endpoints
        .iter()
        .fold(ProbeCascade::new(), |cascade, endpoint| {
            cascade.with_probe(CommandProbe::new(
                endpoint.clone(),
                geo_command(endpoint, timeout),
                timeout,
            ))
        })
}

/// Extract a country from a lookup response
///
/// Accepts plain text (`CN`) or a JSON object with a `country` / `country_code` field.
/// Two-letter codes are upper-cased; other non-blank values are returned trimmed.
pub fn normalize_country(response: &str) -> Option<String> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return None;
    }

    let raw = if trimmed.starts_with('{') {
        let parsed: Value = serde_json::from_str(trimmed).ok()?;
        ["country", "country_code", "countryCode"]
            .iter()
            .find_map(|key| parsed.get(*key).and_then(Value::as_str))
            .map(str::to_string)?
    } else {
        trimmed.lines().next().unwrap_or_default().trim().to_string()
    };

    let raw = raw.trim();
    if raw.is_empty() || raw.len() > 64 || raw.contains('<') {
        return None;
    }
    if raw.len() == 2 && raw.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(raw.to_ascii_uppercase())
    } else {
        Some(raw.to_string())
    }
}

/// Country of the target, `unknown` when no service answered usefully
pub async fn detect_country(cascade: &ProbeCascade, context: &ExecutionContext) -> Result<String> {
    let mut country = None;
    cascade
        .until(context, |probe, output| match normalize_country(output) {
            Some(code) => {
                info!(probe = %probe, country = %code, "🌍 Geolocation resolved");
                country = Some(code);
                true
            }
            None => false,
        })
        .await?;
    Ok(country.unwrap_or_else(|| UNKNOWN.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plain_and_json() {
        assert_eq!(normalize_country("cn\n").as_deref(), Some("CN"));
        assert_eq!(
            normalize_country(r#"{"ip":"1.2.3.4","country":"DE"}"#).as_deref(),
            Some("DE")
        );
        assert_eq!(normalize_country("China").as_deref(), Some("China"));
        assert_eq!(normalize_country("   "), None);
        assert_eq!(normalize_country("<html>rate limited</html>"), None);
        assert_eq!(normalize_country(r#"{"error": true}"#), None);
    }

    #[test]
    fn test_geo_command_has_time_limit() {
        let cmd = geo_command("https://ipinfo.io/country", Duration::from_secs(5));
        assert_eq!(
            cmd,
            "curl -fsSL --max-time 5 'https://ipinfo.io/country' 2>/dev/null"
        );
    }
}
