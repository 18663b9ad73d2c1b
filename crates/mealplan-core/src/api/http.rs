//! HTTP adapter for the meal planner REST API
//!
//! Routes:
//! - `/api/pantry`, `/api/meal-ideas` - POST, PUT `/{id}`, DELETE `/{id}`, GET
//! - `/api/days?start_date&end_date` - notes and events per date
//! - `/api/days/{date}/notes` - PUT `{notes}`
//! - `/api/days/{date}/items/{line_index}` - PATCH `{itemized}`
//! - `/api/calendar/hidden` - POST, DELETE `/{id}`, GET
//! - `/api/health`

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, error};

use super::{ApiError, ApiResult, DayData, RemoteApi};
use crate::config::Config;
use crate::models::{Entity, EntityKind, HiddenCalendarEvent, HideRequest, Item, Note};

const MAX_LOG_BODY_CHARS: usize = 512;

/// REST client for the meal planner server
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApiClient {
    /// Create a client for `base_url`, sending `token` as a bearer token
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> ApiResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::Unauthorized("Invalid access token format".into()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build a client from the configured API URL and token
    ///
    /// Returns `None` when no API URL is configured.
    pub fn from_config(config: &Config) -> ApiResult<Option<Self>> {
        config
            .api_url
            .as_deref()
            .map(|url| Self::new(url, config.auth_token.as_deref(), config.request_timeout()))
            .transpose()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the server is reachable
    pub async fn health(&self) -> ApiResult<()> {
        let response = self
            .send(Method::GET, "/api/health", None)
            .await?;
        Self::check_status(response).await.map(|_| ())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> ApiResult<reqwest::Response> {
        debug!(%method, path, "API request");
        let mut request = self.client.request(method, self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                ApiError::Network(e.to_string())
            } else {
                ApiError::Http(e)
            }
        })
    }

    /// Read the body, mapping non-success statuses to errors
    async fn check_status(response: reqwest::Response) -> ApiResult<String> {
        let status = response.status();
        let body = response.text().await?;
        log_response(status, &body);

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized(format!("{}: {}", status.as_u16(), body)));
        }
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(body);
            return Err(ApiError::api(status.as_u16(), message));
        }
        Ok(body)
    }

    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> ApiResult<T> {
        let body = Self::check_status(response).await?;
        serde_json::from_str(&body).map_err(|e| {
            error!(error = %e, "Failed to deserialize response");
            ApiError::Json(e)
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> ApiResult<T> {
        let response = self.send(method, path, body).await?;
        Self::parse_response(response).await
    }

    async fn request_empty(&self, method: Method, path: &str) -> ApiResult<()> {
        let response = self.send(method, path, None).await?;
        Self::check_status(response).await.map(|_| ())
    }
}

fn log_response(status: StatusCode, body: &str) {
    if status.is_success() {
        debug!(%status, "API response");
        return;
    }

    let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
    if body.chars().count() > MAX_LOG_BODY_CHARS {
        preview.push_str("...");
    }
    debug!(%status, body = %preview, "API error response");
}

#[async_trait]
impl RemoteApi for HttpApiClient {
    async fn create_entity(&self, kind: EntityKind, payload: &Value) -> ApiResult<Entity> {
        let path = format!("/api/{}", kind.collection());
        let value: Value = self.request(Method::POST, &path, Some(payload)).await?;
        Ok(Entity::from_value(kind, value)?)
    }

    async fn update_entity(
        &self,
        kind: EntityKind,
        id: &str,
        payload: &Value,
    ) -> ApiResult<Entity> {
        let path = format!("/api/{}/{}", kind.collection(), id);
        let value: Value = self.request(Method::PUT, &path, Some(payload)).await?;
        Ok(Entity::from_value(kind, value)?)
    }

    async fn delete_entity(&self, kind: EntityKind, id: &str) -> ApiResult<()> {
        let path = format!("/api/{}/{}", kind.collection(), id);
        self.request_empty(Method::DELETE, &path).await
    }

    async fn update_note(&self, date: NaiveDate, text: &str) -> ApiResult<Note> {
        let path = format!("/api/days/{}/notes", date);
        self.request(Method::PUT, &path, Some(&json!({ "notes": text })))
            .await
    }

    async fn set_itemized(
        &self,
        date: NaiveDate,
        line_index: usize,
        itemized: bool,
    ) -> ApiResult<Item> {
        let path = format!("/api/days/{}/items/{}", date, line_index);
        self.request(Method::PATCH, &path, Some(&json!({ "itemized": itemized })))
            .await
    }

    async fn hide_event(&self, request: &HideRequest) -> ApiResult<HiddenCalendarEvent> {
        let body = serde_json::to_value(request)?;
        self.request(Method::POST, "/api/calendar/hidden", Some(&body))
            .await
    }

    async fn unhide_event(&self, id: &str) -> ApiResult<()> {
        let path = format!("/api/calendar/hidden/{}", id);
        self.request_empty(Method::DELETE, &path).await
    }

    async fn list_entities(&self, kind: EntityKind) -> ApiResult<Vec<Entity>> {
        let path = format!("/api/{}", kind.collection());
        let values: Vec<Value> = self.request(Method::GET, &path, None).await?;
        values
            .into_iter()
            .map(|value| Entity::from_value(kind, value).map_err(ApiError::from))
            .collect()
    }

    async fn list_hidden_events(&self) -> ApiResult<Vec<HiddenCalendarEvent>> {
        self.request(Method::GET, "/api/calendar/hidden", None).await
    }

    async fn fetch_days(&self, start: NaiveDate, end: NaiveDate) -> ApiResult<Vec<DayData>> {
        let path = format!("/api/days?start_date={}&end_date={}", start, end);
        self.request(Method::GET, &path, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client =
            HttpApiClient::new("https://meals.example.com/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "https://meals.example.com");
        assert_eq!(client.url("/api/pantry"), "https://meals.example.com/api/pantry");
    }

    #[test]
    fn test_from_config_without_url() {
        let config = Config::default();
        assert!(HttpApiClient::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_invalid_token_rejected() {
        let result = HttpApiClient::new("http://localhost", Some("bad\ntoken"), Duration::from_secs(1));
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    }
}
