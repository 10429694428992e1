use std::rc::Rc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::classify::{ContentKind, classify_content};
use crate::config::WidgetConfig;

pub const ERROR_NETWORK: &str = "network_error";
pub const ERROR_HTML_RESPONSE: &str = "html_response";
pub const ERROR_BODY_SERIALIZE: &str = "request_body_serialize_failed";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobMethod {
    Read,
    Write,
}

impl BlobMethod {
    #[must_use]
    pub fn http_method(self) -> HttpMethod {
        match self {
            Self::Read => HttpMethod::Get,
            Self::Write => HttpMethod::Put,
        }
    }

    fn endpoint(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            status_text: String::new(),
            content_type: None,
            body: body.into(),
        }
    }

    /// The host capability only hands back response text.
    pub fn text_only(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            content_type: None,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request capability is unavailable")]
    Unavailable,
    #[error("failed to build request: {0}")]
    Request(String),
    #[error("network request failed: {0}")]
    Network(String),
}

/// One way of putting a request on the wire: the host's authenticated client
/// or a plain network call.
#[async_trait(?Send)]
pub trait HttpBackend {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportResult {
    pub ok: bool,
    pub status: u16,
    pub status_text: String,
    pub body: Option<String>,
    pub parsed: Option<Value>,
    pub error: Option<String>,
}

impl TransportResult {
    fn failure(status: u16, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            status,
            status_text: String::new(),
            body: None,
            parsed: None,
            error: Some(error.into()),
        }
    }

    fn from_response(response: HttpResponse) -> Self {
        let kind = classify_content(response.content_type.as_deref(), &response.body);
        let success = (200..=299).contains(&response.status);
        if kind == ContentKind::Markup {
            return Self {
                ok: false,
                status: response.status,
                status_text: response.status_text,
                body: Some(response.body),
                parsed: None,
                error: Some(ERROR_HTML_RESPONSE.to_string()),
            };
        }
        let parsed = match kind {
            ContentKind::Json => serde_json::from_str(&response.body).ok(),
            ContentKind::Empty | ContentKind::Text | ContentKind::Markup => None,
        };
        Self {
            ok: success,
            status: response.status,
            status_text: response.status_text,
            body: Some(response.body),
            parsed,
            error: (!success).then(|| format!("http_{}", response.status)),
        }
    }

    #[must_use]
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self.status, 401 | 403)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AdminCredential {
    header: String,
    token: String,
}

/// GET/PUT of a named blob behind a uniform result. Never fails; every
/// failure mode lands in the returned [`TransportResult`].
pub struct BlobTransport {
    base_url: String,
    host: Option<Rc<dyn HttpBackend>>,
    raw: Rc<dyn HttpBackend>,
    admin: Option<AdminCredential>,
}

impl BlobTransport {
    pub fn new(base_url: impl Into<String>, raw: Rc<dyn HttpBackend>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            host: None,
            raw,
            admin: None,
        }
    }

    pub fn from_config(config: &WidgetConfig, raw: Rc<dyn HttpBackend>) -> Self {
        let transport = Self::new(&config.remote_base_url, raw);
        match config.admin_token.as_deref() {
            Some(token) => transport.with_admin_credential(&config.admin_header, token),
            None => transport,
        }
    }

    #[must_use]
    pub fn with_host_client(mut self, host: Rc<dyn HttpBackend>) -> Self {
        self.host = Some(host);
        self
    }

    #[must_use]
    pub fn with_admin_credential(
        mut self,
        header: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let token = token.into();
        if !token.trim().is_empty() {
            self.admin = Some(AdminCredential {
                header: header.into(),
                token,
            });
        }
        self
    }

    #[must_use]
    pub fn endpoint(&self, name: &str, method: BlobMethod) -> String {
        format!(
            "{}/{}?key={}",
            self.base_url,
            method.endpoint(),
            urlencoding::encode(name)
        )
    }

    pub async fn request(
        &self,
        name: &str,
        method: BlobMethod,
        body: Option<&Value>,
    ) -> TransportResult {
        let body = match body.map(serde_json::to_string).transpose() {
            Ok(body) => body,
            Err(error) => {
                tracing::warn!(blob = name, %error, "failed to serialize blob body");
                return TransportResult::failure(0, ERROR_BODY_SERIALIZE);
            }
        };

        let mut headers = vec![(
            REQUEST_ID_HEADER.to_string(),
            format!("req_{}", Uuid::new_v4().simple()),
        )];
        if body.is_some() {
            headers.push(("content-type".to_string(), "application/json".to_string()));
        }
        let request = HttpRequest {
            url: self.endpoint(name, method),
            method: method.http_method(),
            body,
            headers,
        };

        let result = self.dispatch(&request).await;
        if !result.is_auth_rejection() {
            return result;
        }
        let Some(admin) = self.admin.as_ref() else {
            return result;
        };

        tracing::debug!(
            blob = name,
            status = result.status,
            "retrying blob request with admin credential"
        );
        let mut retry = request;
        retry
            .headers
            .push((admin.header.clone(), admin.token.clone()));
        self.dispatch(&retry).await
    }

    async fn dispatch(&self, request: &HttpRequest) -> TransportResult {
        if let Some(host) = self.host.as_ref() {
            match host.send(request).await {
                Ok(response) => return TransportResult::from_response(response),
                Err(error) => {
                    tracing::debug!(
                        url = %request.url,
                        %error,
                        "host request capability failed, falling back to raw request"
                    );
                }
            }
        }

        match self.raw.send(request).await {
            Ok(response) => TransportResult::from_response(response),
            Err(error) => {
                tracing::warn!(url = %request.url, %error, "blob request failed");
                let mut result = TransportResult::failure(0, ERROR_NETWORK);
                result.status_text = error.to_string();
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use futures::executor::block_on;
    use serde_json::json;

    #[test]
    fn endpoint_encodes_blob_key() {
        let transport = BlobTransport::new("/plugins/blob/", Rc::new(ScriptedBackend::offline()));
        assert_eq!(
            transport.endpoint("week plan.json", BlobMethod::Write),
            "/plugins/blob/write?key=week%20plan.json"
        );
    }

    #[test]
    fn host_client_is_tried_first() {
        let host = ScriptedBackend::offline();
        host.push_response(Ok(HttpResponse::text_only(r#"{"schedule":{"Mon":[]}}"#)));
        let raw = ScriptedBackend::offline();
        let transport = BlobTransport::new("/blob", Rc::new(raw.clone()))
            .with_host_client(Rc::new(host.clone()));

        let result = block_on(transport.request("schedule.json", BlobMethod::Read, None));
        assert!(result.ok);
        assert_eq!(result.parsed, Some(json!({"schedule": {"Mon": []}})));
        assert_eq!(host.requests().len(), 1);
        assert!(raw.requests().is_empty());
    }

    #[test]
    fn host_failure_falls_through_to_raw_request() {
        let host = ScriptedBackend::offline();
        host.push_response(Err(TransportError::Network("host client threw".to_string())));
        let raw = ScriptedBackend::offline();
        raw.push_response(Ok(HttpResponse::new(200, "[]")));
        let transport = BlobTransport::new("/blob", Rc::new(raw.clone()))
            .with_host_client(Rc::new(host.clone()));

        let result = block_on(transport.request("schedule.json", BlobMethod::Read, None));
        assert!(result.ok);
        assert_eq!(raw.requests()[0].url, host.requests()[0].url);
    }

    #[test]
    fn login_page_with_success_status_is_a_failure() {
        let raw = ScriptedBackend::offline();
        raw.push_response(Ok(HttpResponse::new(
            200,
            "<!DOCTYPE html><html><body>Sign in</body></html>",
        )));
        let transport = BlobTransport::new("/blob", Rc::new(raw));

        let result = block_on(transport.request("schedule.json", BlobMethod::Read, None));
        assert!(!result.ok);
        assert_eq!(result.status, 200);
        assert_eq!(result.error.as_deref(), Some(ERROR_HTML_RESPONSE));
        assert_eq!(result.parsed, None);
    }

    #[test]
    fn unparseable_body_is_returned_raw() {
        let raw = ScriptedBackend::offline();
        raw.push_response(Ok(HttpResponse::new(200, "{not json")));
        let transport = BlobTransport::new("/blob", Rc::new(raw));

        let result = block_on(transport.request("schedule.json", BlobMethod::Read, None));
        assert!(result.ok);
        assert_eq!(result.body.as_deref(), Some("{not json"));
        assert_eq!(result.parsed, None);
    }

    #[test]
    fn auth_rejection_retries_once_with_admin_credential() {
        let raw = ScriptedBackend::offline();
        raw.push_response(Ok(HttpResponse::new(401, "")));
        raw.push_response(Ok(HttpResponse::new(403, "")));
        let transport = BlobTransport::new("/blob", Rc::new(raw.clone()))
            .with_admin_credential("X-Admin-Token", "secret");

        let result = block_on(transport.request(
            "schedule.json",
            BlobMethod::Write,
            Some(&json!({"schedule": {}})),
        ));
        assert!(!result.ok);
        assert_eq!(result.status, 403);
        assert_eq!(result.error.as_deref(), Some("http_403"));

        let requests = raw.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].header("X-Admin-Token"), None);
        assert_eq!(requests[1].header("x-admin-token"), Some("secret"));
        assert_eq!(requests[1].header("content-type"), Some("application/json"));
        assert_eq!(requests[1].method, HttpMethod::Put);
    }

    #[test]
    fn auth_rejection_without_credential_is_not_retried() {
        let raw = ScriptedBackend::offline();
        raw.push_response(Ok(HttpResponse::new(401, "")));
        let transport = BlobTransport::new("/blob", Rc::new(raw.clone()));

        let result = block_on(transport.request("schedule.json", BlobMethod::Read, None));
        assert_eq!(result.status, 401);
        assert_eq!(raw.requests().len(), 1);
    }

    #[test]
    fn network_failure_is_reported_not_raised() {
        let transport = BlobTransport::new("/blob", Rc::new(ScriptedBackend::offline()));
        let result = block_on(transport.request("schedule.json", BlobMethod::Read, None));
        assert!(!result.ok);
        assert_eq!(result.status, 0);
        assert_eq!(result.error.as_deref(), Some(ERROR_NETWORK));
    }
}
