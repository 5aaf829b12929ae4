//! REST backend adapter.
//!
//! Talks JSON over HTTPS to a collection-per-entity API:
//! `POST/PATCH/DELETE {base}/v1/{collection}[/{id}]` and
//! `GET {base}/v1/{collection}?owner_id=&updated_after=`. Timestamps travel as
//! RFC 3339 strings.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::backend::{RemoteBackend, RemotePayload, RemoteRecord, UpdateOutcome};
use super::error::{BackendError, BackendResult};
use crate::models::{EntityType, Fields, OwnerId};
use crate::util::{
    compact_text, is_http_url, millis_to_rfc3339, normalize_text_option, rfc3339_to_millis,
};

/// HTTP backend that assigns its own record ids.
#[derive(Clone)]
pub struct RestBackend {
    id: String,
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RestBackend")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl RestBackend {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        token: Option<String>,
    ) -> BackendResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| BackendError::Network(error.to_string()))?;
        Ok(Self {
            id: id.into(),
            base_url,
            token: normalize_text_option(token),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, entity_type: EntityType) -> String {
        format!(
            "{}/v1/{}",
            self.base_url,
            entity_type.descriptor().collection
        )
    }

    fn record_url(&self, entity_type: EntityType, remote_id: &str) -> String {
        format!("{}/{}", self.collection_url(entity_type), remote_id)
    }

    async fn send(&self, request: RequestBuilder) -> BackendResult<Response> {
        let request = request.header("Accept", "application/json");
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}

#[async_trait]
impl RemoteBackend for RestBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn health_check(&self) -> BackendResult<()> {
        let url = format!("{}/v1/health", self.base_url);
        self.send(self.client.get(url)).await.map(|_| ())
    }

    async fn create(
        &self,
        entity_type: EntityType,
        payload: &RemotePayload,
    ) -> BackendResult<String> {
        let body = WirePayload::from(payload);
        let response = self
            .send(self.client.post(self.collection_url(entity_type)).json(&body))
            .await?;
        let created = response
            .json::<CreatedResponse>()
            .await
            .map_err(|error| BackendError::InvalidPayload(error.to_string()))?;

        normalize_text_option(Some(created.id))
            .ok_or_else(|| BackendError::InvalidPayload("response did not include id".to_string()))
    }

    async fn update(
        &self,
        entity_type: EntityType,
        remote_id: &str,
        payload: &RemotePayload,
    ) -> BackendResult<UpdateOutcome> {
        let body = WirePayload::from(payload);
        let request = self
            .client
            .patch(self.record_url(entity_type, remote_id))
            .json(&body);

        match self.send(request).await {
            Ok(_) => Ok(UpdateOutcome::Updated),
            Err(BackendError::NotFound(_)) => Ok(UpdateOutcome::NotFound),
            Err(error) => Err(error),
        }
    }

    async fn soft_delete(
        &self,
        entity_type: EntityType,
        remote_id: &str,
        deleted_at: i64,
    ) -> BackendResult<()> {
        let request = self
            .client
            .delete(self.record_url(entity_type, remote_id))
            .query(&[("deleted_at", millis_to_rfc3339(deleted_at))]);
        self.send(request).await.map(|_| ())
    }

    async fn list_since(
        &self,
        entity_type: EntityType,
        owner: &OwnerId,
        since: Option<i64>,
    ) -> BackendResult<Vec<RemoteRecord>> {
        let mut query = vec![("owner_id", owner.as_str().to_string())];
        if let Some(since) = since {
            query.push(("updated_after", millis_to_rfc3339(since)));
        }

        let response = self
            .send(self.client.get(self.collection_url(entity_type)).query(&query))
            .await?;
        let listed = response
            .json::<ListResponse>()
            .await
            .map_err(|error| BackendError::InvalidPayload(error.to_string()))?;

        listed
            .records
            .into_iter()
            .map(RemoteRecord::try_from)
            .collect()
    }
}

#[derive(Debug, Serialize)]
struct WirePayload<'a> {
    owner_id: &'a str,
    client_id: String,
    fields: &'a Fields,
    created_at: String,
    updated_at: String,
}

impl<'a> From<&'a RemotePayload> for WirePayload<'a> {
    fn from(payload: &'a RemotePayload) -> Self {
        Self {
            owner_id: payload.owner_id.as_str(),
            client_id: payload.local_id.as_str(),
            fields: &payload.fields,
            created_at: millis_to_rfc3339(payload.created_at),
            updated_at: millis_to_rfc3339(payload.updated_at),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireRecord {
    id: String,
    owner_id: String,
    #[serde(default)]
    fields: Fields,
    created_at: String,
    updated_at: String,
    #[serde(default)]
    deleted_at: Option<String>,
}

impl TryFrom<WireRecord> for RemoteRecord {
    type Error = BackendError;

    fn try_from(value: WireRecord) -> BackendResult<Self> {
        let timestamp = |raw: &str, field: &str| {
            rfc3339_to_millis(raw).ok_or_else(|| {
                BackendError::InvalidPayload(format!(
                    "record {} has invalid {field}: {}",
                    value.id,
                    compact_text(raw)
                ))
            })
        };

        let created_at = timestamp(&value.created_at, "created_at")?;
        let updated_at = timestamp(&value.updated_at, "updated_at")?;
        let deleted_at = match normalize_text_option(value.deleted_at.clone()) {
            Some(raw) => Some(timestamp(&raw, "deleted_at")?),
            None => None,
        };

        Ok(Self {
            remote_id: value.id,
            owner_id: OwnerId::new(value.owner_id),
            fields: value.fields,
            created_at,
            updated_at,
            deleted_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    records: Vec<WireRecord>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn status_error(status: StatusCode, body: &str) -> BackendError {
    let message = parse_api_error(status, body);
    match status.as_u16() {
        404 => BackendError::NotFound(message),
        401 | 403 => BackendError::Unauthorized(message),
        408 | 429 => BackendError::Server {
            status: status.as_u16(),
            message,
        },
        _ if status.is_client_error() => BackendError::Validation(message),
        code => BackendError::Server {
            status: code,
            message,
        },
    }
}

fn transport_error(error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::Timeout
    } else if error.is_decode() {
        BackendError::InvalidPayload(error.to_string())
    } else {
        BackendError::Network(error.to_string())
    }
}

fn normalize_base_url(raw: String) -> BackendResult<String> {
    let base_url = normalize_text_option(Some(raw)).ok_or_else(|| {
        BackendError::Validation("backend base URL must not be empty".to_string())
    })?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(BackendError::Validation(
            "backend base URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordId;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url(" https://api.example.com/ ".to_string()).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn urls_use_entity_collections() {
        let backend = RestBackend::new("rest", "https://api.example.com/", None).unwrap();
        assert_eq!(
            backend.collection_url(EntityType::Sermon),
            "https://api.example.com/v1/sermons"
        );
        assert_eq!(
            backend.record_url(EntityType::Series, "42"),
            "https://api.example.com/v1/series/42"
        );
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, ""),
            BackendError::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, r#"{"message":"title required"}"#),
            BackendError::Validation(message) if message == "title required (422)"
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, ""),
            BackendError::Unauthorized(_)
        ));
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(status_error(StatusCode::REQUEST_TIMEOUT, "").is_retryable());
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "down").is_retryable());
        assert!(!status_error(StatusCode::CONFLICT, "").is_retryable());
    }

    #[test]
    fn parse_api_error_falls_back_to_status() {
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
        assert_eq!(
            parse_api_error(StatusCode::BAD_REQUEST, r#"{"error":"bad owner"}"#),
            "bad owner (400)"
        );
    }

    #[test]
    fn wire_record_converts_timestamps() {
        let wire: WireRecord = serde_json::from_str(
            r#"{
                "id": "srv-1",
                "owner_id": "user-1",
                "fields": {"title": "Advent"},
                "created_at": "2024-01-01T10:00:00Z",
                "updated_at": "2024-01-01T11:00:00.500Z",
                "deleted_at": null
            }"#,
        )
        .unwrap();

        let record = RemoteRecord::try_from(wire).unwrap();
        assert_eq!(record.remote_id, "srv-1");
        assert_eq!(record.updated_at - record.created_at, 3_600_500);
        assert!(!record.is_deleted());
        assert_eq!(record.fields["title"], "Advent");
    }

    #[test]
    fn wire_record_rejects_bad_timestamps() {
        let wire = WireRecord {
            id: "srv-1".to_string(),
            owner_id: "user-1".to_string(),
            fields: Fields::new(),
            created_at: "yesterday".to_string(),
            updated_at: "2024-01-01T11:00:00Z".to_string(),
            deleted_at: None,
        };
        assert!(matches!(
            RemoteRecord::try_from(wire),
            Err(BackendError::InvalidPayload(_))
        ));
    }

    #[test]
    fn wire_payload_carries_client_id() {
        let payload = RemotePayload {
            owner_id: OwnerId::new("user-1"),
            local_id: RecordId::new(),
            fields: Fields::new(),
            created_at: 0,
            updated_at: 1_000,
        };
        let wire = serde_json::to_value(WirePayload::from(&payload)).unwrap();
        assert_eq!(wire["client_id"], payload.local_id.as_str());
        assert_eq!(wire["updated_at"], "1970-01-01T00:00:01.000Z");
    }

    #[test]
    fn debug_redacts_token() {
        let backend =
            RestBackend::new("rest", "https://api.example.com", Some("secret".to_string()))
                .unwrap();
        let debug = format!("{backend:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
