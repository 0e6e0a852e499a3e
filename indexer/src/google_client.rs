//! Google Indexing API client: service-account JWT minting, OAuth2 token
//! exchange, and multipart/mixed batch submission.
//!
//! The indexing API itself only exposes a single-URL `publish` call; batching
//! is a client-side convention layered on top of the generic Google API
//! batch endpoint (`POST /batch`, `multipart/mixed` request and response).

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{GoogleBatchResult, GoogleResultStatus, GoogleUrlResult, IndexAction, UrlItem};

const TOKEN_SCOPE: &str = "https://www.googleapis.com/auth/indexing";
const PUBLISH_PATH: &str = "/v3/urlNotifications:publish";
const BATCH_ENDPOINT: &str = "https://indexing.googleapis.com/batch";
const BATCH_HOST: &str = "indexing.googleapis.com";
const CHUNK_SIZE: usize = 100;
const GOOGLE_CHUNK_CAP: usize = 1000;

#[derive(Debug, Error)]
pub enum GoogleClientError {
    #[error("service account JSON is invalid: {0}")]
    InvalidServiceAccount(#[from] serde_json::Error),
    #[error("failed to sign JWT: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("token exchange failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token endpoint returned no access_token")]
    MissingAccessToken,
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceAccount {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Serialize)]
struct Claims {
    iss: String,
    scope: String,
    aud: String,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// A single chunk's worth of URL-notification requests to publish.
struct BatchItem {
    url: String,
    action: IndexAction,
    attempts: i32,
}

pub struct GoogleIndexingClient {
    http: Client,
    service_account: ServiceAccount,
}

impl GoogleIndexingClient {
    pub fn from_service_account_json(json: &str) -> Result<Self, GoogleClientError> {
        let service_account: ServiceAccount = serde_json::from_str(json)?;
        Ok(Self {
            http: Client::new(),
            service_account,
        })
    }

    async fn fetch_access_token(&self) -> Result<String, GoogleClientError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let claims = Claims {
            iss: self.service_account.client_email.clone(),
            scope: TOKEN_SCOPE.to_string(),
            aud: self.service_account.token_uri.clone(),
            iat: now,
            exp: now + 3600,
        };

        let key = EncodingKey::from_rsa_pem(self.service_account.private_key.as_bytes())?;
        let jwt = encode(&Header::new(Algorithm::RS256), &claims, &key)?;

        let response = self
            .http
            .post(&self.service_account.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", jwt.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let token: TokenResponse = response.json().await?;
        if token.access_token.is_empty() {
            return Err(GoogleClientError::MissingAccessToken);
        }
        Ok(token.access_token)
    }

    /// Publishes `index` and `delete` items, capped to `⌈1.10 × google_limit⌉`
    /// and chunked into batches of [`CHUNK_SIZE`] (Google's protocol cap is
    /// 1000). Each chunk is a single multipart batch HTTP round trip with no
    /// internal retry — the batch primitive already returns a per-call
    /// outcome.
    pub async fn publish_batch(
        &self,
        index: &[UrlItem],
        delete: &[UrlItem],
        google_limit: i64,
    ) -> Result<GoogleBatchResult, GoogleClientError> {
        let effective_limit = effective_limit(google_limit);
        let items = select_items(index, delete, effective_limit);

        let mut result = GoogleBatchResult {
            total_urls: items.len(),
            ..Default::default()
        };
        if items.is_empty() {
            return Ok(result);
        }

        let access_token = self.fetch_access_token().await?;

        for (chunk_number, chunk) in items.chunks(CHUNK_SIZE.min(GOOGLE_CHUNK_CAP)).enumerate() {
            debug!(chunk_number, size = chunk.len(), "submitting google batch chunk");
            match self.submit_chunk(&access_token, chunk).await {
                Ok(chunk_results) => {
                    for r in chunk_results {
                        result.add(r);
                    }
                }
                Err(e) => {
                    warn!(chunk_number, error = %e, "google batch chunk request failed outright");
                    for item in chunk {
                        result.add(GoogleUrlResult {
                            url: item.url.clone(),
                            action: action_string(item.action).to_string(),
                            status: GoogleResultStatus::Failed,
                            attempts: item.attempts,
                            error_message: Some(e.to_string()),
                            http_status: None,
                        });
                    }
                }
            }
        }

        Ok(result)
    }

    async fn submit_chunk(
        &self,
        access_token: &str,
        chunk: &[BatchItem],
    ) -> Result<Vec<GoogleUrlResult>, GoogleClientError> {
        let boundary = format!("batch_{}", uuid::Uuid::new_v4().simple());
        let body = build_batch_body(&boundary, chunk);

        let response = self
            .http
            .post(BATCH_ENDPOINT)
            .bearer_auth(access_token)
            .header(
                "Content-Type",
                format!("multipart/mixed; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await?;

        let response_boundary = content_type_boundary(response.headers()).unwrap_or(boundary);
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Ok(chunk
                .iter()
                .map(|item| GoogleUrlResult {
                    url: item.url.clone(),
                    action: action_string(item.action).to_string(),
                    status: if status.as_u16() == 429 {
                        GoogleResultStatus::QuotaExceeded
                    } else {
                        GoogleResultStatus::Failed
                    },
                    attempts: item.attempts,
                    error_message: Some(text.clone()),
                    http_status: Some(status.as_u16()),
                })
                .collect());
        }

        Ok(parse_batch_response(&response_boundary, &text, chunk))
    }
}

fn effective_limit(limit: i64) -> usize {
    (((limit.max(0) as f64) * 1.10).ceil() as i64).max(0) as usize
}

fn select_items(index: &[UrlItem], delete: &[UrlItem], limit: usize) -> Vec<BatchItem> {
    let mut items = Vec::new();
    for item in index {
        if items.len() >= limit {
            break;
        }
        items.push(BatchItem {
            url: item.web_url.clone(),
            action: IndexAction::Index,
            attempts: item.attempts,
        });
    }
    for item in delete {
        if items.len() >= limit {
            break;
        }
        items.push(BatchItem {
            url: item.web_url.clone(),
            action: IndexAction::Delete,
            attempts: item.attempts,
        });
    }
    items
}

fn action_string(action: IndexAction) -> &'static str {
    match action {
        IndexAction::Index => "URL_UPDATED",
        IndexAction::Delete => "URL_DELETED",
        IndexAction::Ignore => "URL_UPDATED",
    }
}

fn build_batch_body(boundary: &str, chunk: &[BatchItem]) -> String {
    let mut body = String::new();
    for (i, item) in chunk.iter().enumerate() {
        let payload = serde_json::json!({
            "url": item.url,
            "type": action_string(item.action),
        });
        body.push_str(&format!("--{boundary}\r\n"));
        body.push_str("Content-Type: application/http\r\n");
        body.push_str(&format!("Content-ID: <item{i}>\r\n\r\n"));
        body.push_str(&format!("POST {PUBLISH_PATH} HTTP/1.1\r\n"));
        body.push_str("Content-Type: application/json\r\n");
        body.push_str(&format!("Host: {BATCH_HOST}\r\n\r\n"));
        body.push_str(&payload.to_string());
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{boundary}--\r\n"));
    body
}

fn content_type_boundary(headers: &reqwest::header::HeaderMap) -> Option<String> {
    let content_type = headers.get(reqwest::header::CONTENT_TYPE)?.to_str().ok()?;
    content_type
        .split(';')
        .find_map(|part| part.trim().strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
}

/// Parses a `multipart/mixed` batch response, matching parts back to
/// `chunk` positionally (Google returns sub-responses in request order).
fn parse_batch_response(boundary: &str, body: &str, chunk: &[BatchItem]) -> Vec<GoogleUrlResult> {
    let delimiter = format!("--{boundary}");
    let parts: Vec<&str> = body
        .split(&delimiter)
        .filter(|p| !p.trim().is_empty() && *p != "--")
        .collect();

    let mut results = Vec::with_capacity(chunk.len());
    for (i, item) in chunk.iter().enumerate() {
        let part = parts.get(i);
        let (http_status, error_message) = match part.and_then(|p| extract_inner_status(p)) {
            Some((status, msg)) => (Some(status), msg),
            None => (None, Some("malformed batch sub-response".to_string())),
        };

        let status = match http_status {
            Some(200) => GoogleResultStatus::Success,
            Some(429) => GoogleResultStatus::QuotaExceeded,
            _ => GoogleResultStatus::Failed,
        };

        results.push(GoogleUrlResult {
            url: item.url.clone(),
            action: action_string(item.action).to_string(),
            status,
            attempts: item.attempts,
            error_message: if status == GoogleResultStatus::Success {
                None
            } else {
                error_message
            },
            http_status,
        });
    }
    results
}

fn extract_inner_status(part: &str) -> Option<(u16, Option<String>)> {
    let http_line = part
        .lines()
        .find(|line| line.trim_start().starts_with("HTTP/"))?;
    let status: u16 = http_line.split_whitespace().nth(1)?.parse().ok()?;
    let body_start = part.find("\r\n\r\n").map(|i| i + 4).unwrap_or(part.len());
    let inner_body = part[body_start..].trim();
    let message = if status == 200 {
        None
    } else {
        Some(inner_body.to_string())
    };
    Some((status, message))
}
