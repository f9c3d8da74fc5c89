//! HTTP client for the field-data REST API.
//!
//! Implements the `RemoteApi` port over the create/update/delete endpoints
//! plus the evidence media upload. The client performs no internal retries;
//! the sync queue's attempt policy owns retry.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use fieldbook_core::sync::{EntityKind, MediaAck, MediaUpload, RemoteAck, RemoteApi};
use fieldbook_core::RemoteError;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

/// Error body shape returned by the field API.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: String,
    message: String,
}

/// REST collection segment for an entity kind.
fn collection(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Property => "properties",
        EntityKind::Inspection => "inspections",
        EntityKind::Evidence => "evidence",
    }
}

fn transport_err(err: reqwest::Error) -> RemoteError {
    RemoteError::transport(err.to_string())
}

/// Client for the field-data cloud API.
///
/// One instance is shared by the sync engine for entity calls and media
/// uploads. The bearer token is optional so the client can be built before
/// the operator signs in; requests simply go out unauthenticated until a
/// token is supplied.
#[derive(Debug, Clone)]
pub struct FieldApiClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl FieldApiClient {
    /// Create a new client without credentials.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the field API (e.g., "https://api.fieldbook.app")
    pub fn new(base_url: &str) -> Self {
        Self::with_token(base_url, None)
    }

    /// Create a new client with an optional bearer token.
    pub fn with_token(base_url: &str, bearer_token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token,
        }
    }

    /// Create headers for an API request.
    fn headers(&self) -> Result<HeaderMap, RemoteError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = &self.bearer_token {
            let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| RemoteError::auth("Invalid access token format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }

        Ok(headers)
    }

    fn log_response(status: StatusCode, body: &str) {
        if status.is_success() {
            debug!("API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("API response error ({}): {}", status, preview);
    }

    /// Map a non-success response onto the remote error taxonomy.
    ///
    /// HTTP 409 becomes the conflict variant so the engine can stamp the
    /// entity instead of burning retry attempts; 401/403 become auth errors.
    fn response_error(status: StatusCode, body: &str) -> RemoteError {
        if status.as_u16() == 409 {
            let server_updated_at = serde_json::from_str::<Value>(body).ok().and_then(|value| {
                value
                    .get("serverUpdatedAt")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
            return RemoteError::Conflict { server_updated_at };
        }

        let message = match serde_json::from_str::<ApiErrorBody>(body) {
            Ok(parsed) => format!("{}: {}", parsed.code, parsed.message),
            Err(_) => format!("Request failed: {}", body),
        };

        match status.as_u16() {
            401 | 403 => RemoteError::auth(message),
            code => RemoteError::api(code, message),
        }
    }

    /// Parse a JSON response body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        let status = response.status();
        let body = response.text().await.map_err(transport_err)?;
        Self::log_response(status, &body);

        if !status.is_success() {
            return Err(Self::response_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            error!(
                "Failed to deserialize response. Body: {}, Error: {}",
                body, e
            );
            RemoteError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    /// Check a response for success, discarding any body.
    async fn check_response(response: reqwest::Response) -> Result<(), RemoteError> {
        let status = response.status();
        let body = response.text().await.map_err(transport_err)?;
        Self::log_response(status, &body);

        if !status.is_success() {
            return Err(Self::response_error(status, &body));
        }

        Ok(())
    }
}

#[async_trait]
impl RemoteApi for FieldApiClient {
    /// Create an entity record.
    ///
    /// The local id rides inside the payload as the idempotency key, so a
    /// re-sent create after an unknown outcome lands on the same record.
    ///
    /// POST /api/v1/{properties|inspections|evidence}
    async fn create_entity(
        &self,
        entity_type: EntityKind,
        local_id: &str,
        payload: &Value,
    ) -> Result<RemoteAck, RemoteError> {
        let url = format!("{}/api/v1/{}", self.base_url, collection(entity_type));
        debug!("Creating {} {} via {}", entity_type.as_str(), local_id, url);

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(payload)
            .send()
            .await
            .map_err(transport_err)?;

        Self::parse_response(response).await
    }

    /// Update an entity record addressed by local id.
    ///
    /// PUT /api/v1/{collection}/{localId}?serverId={serverId}
    async fn update_entity(
        &self,
        entity_type: EntityKind,
        local_id: &str,
        server_id: Option<&str>,
        payload: &Value,
    ) -> Result<RemoteAck, RemoteError> {
        let url = format!(
            "{}/api/v1/{}/{}",
            self.base_url,
            collection(entity_type),
            local_id
        );
        debug!("Updating {} {} via {}", entity_type.as_str(), local_id, url);

        let mut request = self.client.put(&url).headers(self.headers()?).json(payload);
        if let Some(server_id) = server_id {
            request = request.query(&[("serverId", server_id)]);
        }

        let response = request.send().await.map_err(transport_err)?;
        Self::parse_response(response).await
    }

    /// Delete an entity record addressed by local id.
    ///
    /// DELETE /api/v1/{collection}/{localId}?serverId={serverId}
    async fn delete_entity(
        &self,
        entity_type: EntityKind,
        local_id: &str,
        server_id: Option<&str>,
    ) -> Result<(), RemoteError> {
        let url = format!(
            "{}/api/v1/{}/{}",
            self.base_url,
            collection(entity_type),
            local_id
        );
        debug!("Deleting {} {} via {}", entity_type.as_str(), local_id, url);

        let mut request = self.client.delete(&url).headers(self.headers()?);
        if let Some(server_id) = server_id {
            request = request.query(&[("serverId", server_id)]);
        }

        let response = request.send().await.map_err(transport_err)?;
        Self::check_response(response).await
    }

    /// Upload captured evidence media as a raw octet-stream body.
    ///
    /// File name and inspection identities ride in headers so the server can
    /// key the upload even when the evidence create has not landed yet.
    ///
    /// POST /api/v1/evidence/{localId}/media
    async fn upload_evidence_media(&self, upload: MediaUpload) -> Result<MediaAck, RemoteError> {
        let url = format!(
            "{}/api/v1/evidence/{}/media",
            self.base_url, upload.evidence_local_id
        );
        debug!(
            "Uploading {} media bytes ({}) via {}",
            upload.bytes.len(),
            upload.content_type,
            url
        );

        let mut headers = self.headers()?;
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(&upload.content_type)
                .map_err(|_| RemoteError::invalid_request("Invalid media content type"))?,
        );
        headers.insert(
            "x-evidence-file-name",
            HeaderValue::from_str(&upload.file_name)
                .map_err(|_| RemoteError::invalid_request("Invalid media file name"))?,
        );
        headers.insert(
            "x-inspection-id",
            HeaderValue::from_str(&upload.inspection_local_id)
                .map_err(|_| RemoteError::invalid_request("Invalid inspection id"))?,
        );
        if let Some(server_id) = upload.inspection_server_id.as_deref() {
            headers.insert(
                "x-inspection-server-id",
                HeaderValue::from_str(server_id)
                    .map_err(|_| RemoteError::invalid_request("Invalid inspection server id"))?,
            );
        }

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .body(upload.bytes)
            .send()
            .await
            .map_err(transport_err)?;

        Self::parse_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldbook_core::errors::RemoteRetryClass;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        method: String,
        target: String,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    }

    fn ack_body(server_id: &str) -> String {
        format!(
            r#"{{"serverId":"{}","serverUpdatedAt":"2026-07-01T12:00:00.000Z"}}"#,
            server_id
        )
    }

    fn api_error_body(code: &str, message: &str) -> String {
        format!(
            r#"{{"error":"error","code":"{}","message":"{}"}}"#,
            code, message
        )
    }

    fn header_end_offset(buffer: &[u8]) -> Option<usize> {
        buffer.windows(4).position(|window| window == b"\r\n\r\n")
    }

    async fn read_http_request(stream: &mut tokio::net::TcpStream) -> Option<CapturedRequest> {
        let mut buffer = Vec::new();
        loop {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                return None;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if header_end_offset(&buffer).is_some() {
                break;
            }
        }

        let header_end = header_end_offset(&buffer)?;
        let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
        let mut lines = head.lines();
        let request_line = lines.next()?.to_string();
        let mut parts = request_line.split_whitespace();
        let method = parts.next()?.to_string();
        let target = parts.next()?.to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        let mut body = buffer[header_end + 4..].to_vec();
        while body.len() < content_length {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }
        body.truncate(content_length);

        Some(CapturedRequest {
            method,
            target,
            headers,
            body,
        })
    }

    fn status_text(status: u16) -> &'static str {
        match status {
            200 => "OK",
            201 => "Created",
            401 => "Unauthorized",
            404 => "Not Found",
            409 => "Conflict",
            500 => "Internal Server Error",
            _ => "Error",
        }
    }

    async fn write_http_response(
        stream: &mut tokio::net::TcpStream,
        status: u16,
        body: &str,
    ) -> std::io::Result<()> {
        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            status_text(status),
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await
    }

    async fn start_mock_server(
        responses: Vec<(u16, String)>,
    ) -> (
        String,
        Arc<TokioMutex<Vec<CapturedRequest>>>,
        tokio::task::JoinHandle<()>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let captured = Arc::new(TokioMutex::new(Vec::<CapturedRequest>::new()));
        let scripted = Arc::new(TokioMutex::new(VecDeque::from(responses)));
        let captured_clone = Arc::clone(&captured);
        let scripted_clone = Arc::clone(&scripted);

        let handle = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(value) => value,
                    Err(_) => break,
                };
                let captured_inner = Arc::clone(&captured_clone);
                let scripted_inner = Arc::clone(&scripted_clone);
                tokio::spawn(async move {
                    let Some(request) = read_http_request(&mut stream).await else {
                        return;
                    };
                    captured_inner.lock().await.push(request);

                    let (status, body) = scripted_inner
                        .lock()
                        .await
                        .pop_front()
                        .unwrap_or((500, api_error_body("INTERNAL", "unexpected request")));
                    let _ = write_http_response(&mut stream, status, &body).await;
                });
            }
        });

        (format!("http://{}", addr), captured, handle)
    }

    #[tokio::test]
    async fn create_posts_the_payload_and_parses_the_ack() {
        let (base_url, captured, server) = start_mock_server(vec![(201, ack_body("srv-p1"))]).await;

        let client = FieldApiClient::with_token(&base_url, Some("token-123".to_string()));
        let payload = serde_json::json!({ "localId": "p1", "name": "Harbor Point Warehouse" });
        let ack = client
            .create_entity(EntityKind::Property, "p1", &payload)
            .await
            .expect("create ack");

        assert_eq!(ack.server_id, "srv-p1");
        assert_eq!(
            ack.server_updated_at.as_deref(),
            Some("2026-07-01T12:00:00.000Z")
        );

        let requests = captured.lock().await.clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].target, "/api/v1/properties");
        assert_eq!(
            requests[0].headers.get("authorization").map(String::as_str),
            Some("Bearer token-123")
        );
        let sent: Value = serde_json::from_slice(&requests[0].body).expect("request body json");
        assert_eq!(sent["localId"], "p1");

        server.abort();
    }

    #[tokio::test]
    async fn update_conflict_surfaces_the_server_stamp() {
        let conflict_body = r#"{"error":"conflict","code":"STALE_WRITE","message":"remote copy changed","serverUpdatedAt":"2026-07-02T08:30:00Z"}"#;
        let (base_url, captured, server) =
            start_mock_server(vec![(409, conflict_body.to_string())]).await;

        let client = FieldApiClient::new(&base_url);
        let payload = serde_json::json!({ "localId": "p1" });
        let err = client
            .update_entity(EntityKind::Property, "p1", Some("srv-p1"), &payload)
            .await
            .expect_err("conflict error");

        match err {
            RemoteError::Conflict { server_updated_at } => {
                assert_eq!(server_updated_at.as_deref(), Some("2026-07-02T08:30:00Z"));
            }
            other => panic!("expected conflict, got {:?}", other),
        }

        let requests = captured.lock().await.clone();
        assert_eq!(requests[0].method, "PUT");
        assert_eq!(requests[0].target, "/api/v1/properties/p1?serverId=srv-p1");

        server.abort();
    }

    #[tokio::test]
    async fn delete_surfaces_not_found_as_an_api_error() {
        let (base_url, captured, server) =
            start_mock_server(vec![(404, api_error_body("NOT_FOUND", "no such record"))]).await;

        let client = FieldApiClient::new(&base_url);
        let err = client
            .delete_entity(EntityKind::Inspection, "i9", None)
            .await
            .expect_err("not found error");

        assert_eq!(err.status_code(), Some(404));

        let requests = captured.lock().await.clone();
        assert_eq!(requests[0].method, "DELETE");
        assert_eq!(requests[0].target, "/api/v1/inspections/i9");

        server.abort();
    }

    #[tokio::test]
    async fn media_upload_sends_raw_bytes_with_identity_headers() {
        let media_ack = r#"{"remoteUrl":"https://cdn.test/evidence/e1.jpg"}"#;
        let (base_url, captured, server) =
            start_mock_server(vec![(200, media_ack.to_string())]).await;

        let client = FieldApiClient::with_token(&base_url, Some("token-123".to_string()));
        let upload = MediaUpload {
            evidence_local_id: "e1".to_string(),
            inspection_local_id: "i1".to_string(),
            inspection_server_id: Some("srv-i1".to_string()),
            file_name: "e1.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            bytes: vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10],
        };
        let ack = client
            .upload_evidence_media(upload)
            .await
            .expect("media ack");
        assert_eq!(ack.remote_url, "https://cdn.test/evidence/e1.jpg");

        let requests = captured.lock().await.clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].target, "/api/v1/evidence/e1/media");
        assert_eq!(
            requests[0].headers.get("content-type").map(String::as_str),
            Some("image/jpeg")
        );
        assert_eq!(
            requests[0]
                .headers
                .get("x-evidence-file-name")
                .map(String::as_str),
            Some("e1.jpg")
        );
        assert_eq!(
            requests[0]
                .headers
                .get("x-inspection-id")
                .map(String::as_str),
            Some("i1")
        );
        assert_eq!(
            requests[0]
                .headers
                .get("x-inspection-server-id")
                .map(String::as_str),
            Some("srv-i1")
        );
        assert_eq!(requests[0].body, vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]);

        server.abort();
    }

    #[tokio::test]
    async fn auth_failures_classify_as_reauth_required() {
        let (base_url, _captured, server) =
            start_mock_server(vec![(401, api_error_body("TOKEN_EXPIRED", "token expired"))]).await;

        let client = FieldApiClient::new(&base_url);
        let payload = serde_json::json!({ "localId": "p1" });
        let err = client
            .create_entity(EntityKind::Property, "p1", &payload)
            .await
            .expect_err("auth error");

        assert!(matches!(err, RemoteError::Auth(_)));
        assert_eq!(err.retry_class(), RemoteRetryClass::ReauthRequired);

        server.abort();
    }

    #[tokio::test]
    async fn unparseable_error_bodies_still_carry_the_status() {
        let (base_url, _captured, server) =
            start_mock_server(vec![(500, "upstream exploded".to_string())]).await;

        let client = FieldApiClient::new(&base_url);
        let payload = serde_json::json!({ "localId": "p1" });
        let err = client
            .create_entity(EntityKind::Property, "p1", &payload)
            .await
            .expect_err("server error");

        assert_eq!(err.status_code(), Some(500));
        assert!(err.to_string().contains("upstream exploded"));

        server.abort();
    }

    #[tokio::test]
    async fn connection_failures_become_transport_errors() {
        // Bind then drop to grab a port with nothing listening behind it.
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind probe listener");
        let addr = listener.local_addr().expect("listener addr");
        drop(listener);

        let client = FieldApiClient::new(&format!("http://{}", addr));
        let payload = serde_json::json!({ "localId": "p1" });
        let err = client
            .create_entity(EntityKind::Property, "p1", &payload)
            .await
            .expect_err("transport error");

        assert!(matches!(err, RemoteError::Transport(_)));
        assert_eq!(err.retry_class(), RemoteRetryClass::Retryable);
    }
}
