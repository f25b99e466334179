//! HTTP handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::header,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{error::ApiError, AppState};
use crate::pins::PinEntry;
use crate::types::{PublicKey, Record};

/// POST /pin/ body
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinRequest {
    pub root_key: String,
}

/// GET /latest/ query string
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestQuery {
    pub root_key: Option<String>,
}

/// Response carrying a feed's current record (`null` if nothing published yet)
#[derive(Serialize)]
pub struct LatestResponse {
    pub latest: Option<Record>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub pins: usize,
    pub listening: usize,
    pub regressions: u64,
}

fn parse_key(raw: &str) -> Result<PublicKey, ApiError> {
    raw.parse::<PublicKey>()
        .map_err(|e| ApiError::BadRequest(format!("rootKey: {}", e)))
}

/// POST /pin/
pub async fn pin(
    State(state): State<Arc<AppState>>,
    body: Result<Json<PinRequest>, JsonRejection>,
) -> Result<Json<LatestResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let key = parse_key(&request.root_key)?;

    let latest = state.pins.setup(key).await?;
    Ok(Json(LatestResponse { latest }))
}

/// GET /pins/
pub async fn list_pins(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pins = state.pins.list_all().await;
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        render_listing(&pins),
    )
}

/// One `<br />` line per pin, in key order
pub fn render_listing(pins: &[PinEntry]) -> String {
    pins.iter()
        .map(|entry| match &entry.latest {
            Some(record) => format!(
                "\n<br />{} {}: {}",
                record.timestamp.to_rfc3339(),
                entry.key,
                html_escape(&record.text)
            ),
            None => format!("\n<br />{}: null", entry.key),
        })
        .collect()
}

fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// GET /latest/?rootKey=
pub async fn latest(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LatestQuery>,
) -> Result<Json<LatestResponse>, ApiError> {
    let raw = query
        .root_key
        .ok_or_else(|| ApiError::BadRequest("rootKey is required".to_string()))?;
    let key = parse_key(&raw)?;

    let latest = state.pins.latest(&key).await?;
    debug!(key = %key, has_record = latest.is_some(), "GET latest");
    Ok(Json(LatestResponse { latest }))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let stats = state.pins.stats().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pins: stats.pins,
        listening: stats.listening,
        regressions: stats.regressions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_render_listing() {
        let with_record = PublicKey::from_bytes([0xab; 32]);
        let without = PublicKey::from_bytes([0x01; 32]);
        let pins = vec![
            PinEntry { key: without, latest: None },
            PinEntry {
                key: with_record,
                latest: Some(Record::new(
                    Utc.with_ymd_and_hms(2021, 3, 1, 12, 0, 0).unwrap(),
                    "hi <b>",
                )),
            },
        ];

        let html = render_listing(&pins);
        assert_eq!(
            html,
            format!(
                "\n<br />{}: null\n<br />2021-03-01T12:00:00+00:00 {}: hi &lt;b&gt;",
                without, with_record
            )
        );
    }

    #[test]
    fn test_parse_key_maps_to_bad_request() {
        let err = parse_key("short").unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }
}
