//! REST client for the inspection backing store
//!
//! Paths are relative to the configured API base URL:
//! - `GET|PUT /inspections/{id}`, `POST /inspections`
//! - `GET|POST /broadcasters`
//! - `GET|POST /programs`, `POST /programs/{id}/add-broadcaster`,
//!   `POST /programs/{id}/remove-broadcaster`
//!
//! Requests carry `Authorization: Token <token>` when a token is configured.

use super::{BackingStore, StoreError};
use crate::models::records::{Broadcaster, InspectionRecord, Payload, Program};
use crate::services::validation::FieldErrors;
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use sitrep_common::{EntityId, Error};
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("sitrep-wizard/", env!("CARGO_PKG_VERSION"));

/// HTTP implementation of [`BackingStore`]
#[derive(Clone)]
pub struct HttpBackingStore {
    client: Client,
    base_url: String,
}

impl HttpBackingStore {
    /// Create a client for `base_url` (e.g. `http://127.0.0.1:8000/api`)
    pub fn new(
        base_url: &str,
        auth_token: Option<&str>,
        timeout: Duration,
    ) -> sitrep_common::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static(USER_AGENT),
        );
        if let Some(token) = auth_token.map(str::trim).filter(|t| !t.is_empty()) {
            let value = header::HeaderValue::from_str(&format!("Token {}", token))
                .map_err(|e| Error::Config(format!("Invalid auth token: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Execute a request and map non-success statuses
    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, StoreError> {
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Network(format!("{} failed: {}", what, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), request = what, "Backing store rejected request");

        Err(match status.as_u16() {
            400 => {
                let parsed = serde_json::from_str::<Value>(&body)
                    .unwrap_or_else(|_| Value::String(body.clone()));
                StoreError::Validation(FieldErrors::from_response_body(&parsed))
            }
            404 => StoreError::NotFound(what.to_string()),
            code => StoreError::Unexpected { status: code, body },
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, StoreError> {
        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::Parse(format!("{}: {}", what, e)))
    }

    async fn list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, StoreError> {
        let what = format!("GET {}", path);
        let response = self.send(self.client.get(self.url(path)), &what).await?;
        let body: Value = Self::decode(response, &what).await?;

        let items = normalize_list(body, path);
        let total = items.len();
        let parsed: Vec<T> = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<T>(item) {
                Ok(entity) => Some(entity),
                Err(e) => {
                    warn!(path, "Skipping malformed list entry: {}", e);
                    None
                }
            })
            .collect();

        debug!(path, total, parsed = parsed.len(), "Fetched entity list");
        Ok(parsed)
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, StoreError> {
        let what = format!("POST {}", path);
        let response = self
            .send(self.client.post(self.url(path)).json(body), &what)
            .await?;
        Self::decode(response, &what).await
    }
}

/// Accept a bare array, `{ "results": [...] }` or `{ "data": [...] }`
pub fn normalize_list(body: Value, path: &str) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            for key in ["results", "data"] {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return items;
                }
            }
            warn!(path, "Unexpected list response format");
            Vec::new()
        }
        _ => {
            warn!(path, "Unexpected list response format");
            Vec::new()
        }
    }
}

#[async_trait]
impl BackingStore for HttpBackingStore {
    async fn get_inspection(&self, id: &EntityId) -> Result<InspectionRecord, StoreError> {
        let path = format!("/inspections/{}", id.as_path_segment());
        let what = format!("GET {}", path);
        let response = self.send(self.client.get(self.url(&path)), &what).await?;
        Self::decode(response, &what).await
    }

    async fn create_inspection(&self, payload: &Payload) -> Result<InspectionRecord, StoreError> {
        self.post_json("/inspections", &Value::Object(payload.clone()))
            .await
    }

    async fn update_inspection(
        &self,
        id: &EntityId,
        payload: &Payload,
    ) -> Result<InspectionRecord, StoreError> {
        let path = format!("/inspections/{}", id.as_path_segment());
        let what = format!("PUT {}", path);
        let response = self
            .send(self.client.put(self.url(&path)).json(payload), &what)
            .await?;
        Self::decode(response, &what).await
    }

    async fn list_broadcasters(&self) -> Result<Vec<Broadcaster>, StoreError> {
        self.list("/broadcasters").await
    }

    async fn create_broadcaster(&self, attributes: &Payload) -> Result<Broadcaster, StoreError> {
        self.post_json("/broadcasters", &Value::Object(attributes.clone()))
            .await
    }

    async fn list_programs(&self) -> Result<Vec<Program>, StoreError> {
        self.list("/programs").await
    }

    async fn create_program(&self, attributes: &Payload) -> Result<Program, StoreError> {
        self.post_json("/programs", &Value::Object(attributes.clone()))
            .await
    }

    async fn add_broadcaster_to_program(
        &self,
        program: &EntityId,
        broadcaster: &EntityId,
    ) -> Result<(), StoreError> {
        let path = format!("/programs/{}/add-broadcaster", program.as_path_segment());
        let what = format!("POST {}", path);
        let body = json!({ "broadcaster_id": broadcaster.to_json() });
        self.send(self.client.post(self.url(&path)).json(&body), &what)
            .await?;
        Ok(())
    }

    async fn remove_broadcaster_from_program(
        &self,
        program: &EntityId,
        broadcaster: &EntityId,
    ) -> Result<(), StoreError> {
        let path = format!("/programs/{}/remove-broadcaster", program.as_path_segment());
        let what = format!("POST {}", path);
        let body = json!({ "broadcaster_id": broadcaster.to_json() });
        self.send(self.client.post(self.url(&path)).json(&body), &what)
            .await?;
        Ok(())
    }
}
