pub mod bigquery;
pub mod databricks;
pub mod snowflake;

use crate::error::AdapterError;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::StatusCode;
use serde_json::Value as Json;

/// Thin bearer-token JSON client shared by the REST-backed dialects.
///
/// Error mapping is uniform: auth failures surface as connect/permission
/// errors, server-side and throttling statuses as retryable fetch
/// failures, everything else as permanent.
pub(crate) struct RestClient {
    http: reqwest::Client,
    token: String,
}

impl RestClient {
    pub fn new(token: String) -> Result<Self, AdapterError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AdapterError::Connect(e.to_string()))?;
        Ok(RestClient { http, token })
    }

    pub async fn post_json(
        &self,
        url: &str,
        body: &Json,
        headers: &[(&str, &str)],
    ) -> Result<Json, AdapterError> {
        let mut request = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::fetch_retryable(e))?;
        Self::read_json(response).await
    }

    pub async fn get_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<Json, AdapterError> {
        let mut request = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::fetch_retryable(e))?;
        Self::read_json(response).await
    }

    async fn read_json(response: reqwest::Response) -> Result<Json, AdapterError> {
        let status = response.status();
        if status.is_success() || status == StatusCode::ACCEPTED {
            let mut json: Json = response
                .json()
                .await
                .map_err(|e| AdapterError::fetch_retryable(e))?;
            if status == StatusCode::ACCEPTED {
                json["__accepted"] = Json::Bool(true);
            }
            return Ok(json);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED => AdapterError::Connect(body),
            StatusCode::FORBIDDEN => AdapterError::PermissionDenied(body),
            StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
                AdapterError::fetch_retryable(format!("{status}: {body}"))
            }
            s if s.is_server_error() => {
                AdapterError::fetch_retryable(format!("{status}: {body}"))
            }
            _ => AdapterError::fetch_permanent(format!("{status}: {body}")),
        })
    }
}

/// Resolves the bearer token for a REST dialect: explicit `token` first,
/// then the contents of `credentials-file`.
pub(crate) fn resolve_token(
    token: &Option<String>,
    credentials_file: &Option<String>,
) -> Result<String, AdapterError> {
    if let Some(token) = token {
        return Ok(token.clone());
    }
    if let Some(path) = credentials_file {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AdapterError::Connect(format!("cannot read {path}: {e}")))?;
        return Ok(contents.trim().to_string());
    }
    Err(AdapterError::Config(
        "missing required option: token or credentials-file".into(),
    ))
}

/// Parses `"1674040133.123456789"` (epoch seconds with fraction) into a
/// UTC timestamp, microsecond precision.
pub(crate) fn parse_epoch_seconds(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.split_whitespace().next()?;
    let (secs, frac) = match raw.split_once('.') {
        Some((s, f)) => (s, f),
        None => (raw, ""),
    };
    let secs: i64 = secs.parse().ok()?;
    let micros = if frac.is_empty() {
        0
    } else {
        let digits: String = frac.chars().take(6).collect();
        let padded = format!("{digits:0<6}");
        padded.parse::<i64>().ok()?
    };
    DateTime::from_timestamp(secs, (micros * 1_000) as u32)
}

/// Parses an ISO timestamp with or without zone designator.
pub(crate) fn parse_iso_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    None
}

/// Extracts a JSON cell as its raw text, serializing non-string scalars.
pub(crate) fn cell_text(cell: &Json) -> Option<String> {
    match cell {
        Json::Null => None,
        Json::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_epoch_with_nanosecond_fraction() {
        let ts = parse_epoch_seconds("1674040133.123456789").unwrap();
        assert_eq!(ts.timestamp(), 1_674_040_133);
        assert_eq!(ts.timestamp_subsec_micros(), 123_456);
    }

    #[test]
    fn parses_epoch_with_zone_suffix() {
        let ts = parse_epoch_seconds("1674040133.500 +0100").unwrap();
        assert_eq!(ts.timestamp(), 1_674_040_133);
        assert_eq!(ts.timestamp_subsec_micros(), 500_000);
    }

    #[test]
    fn parses_iso_variants() {
        assert!(parse_iso_timestamp("2024-05-01T10:20:30Z").is_some());
        assert!(parse_iso_timestamp("2024-05-01T10:20:30.123").is_some());
        assert!(parse_iso_timestamp("2024-05-01 10:20:30").is_some());
    }
}
