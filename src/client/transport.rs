//! The network seam of the client.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;

use super::error::RequestError;

/// A fully resolved request, as seen by interceptors and transports.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

/// Raw response of a transport; the body is decoded lazily.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub status_text: String,
    pub body: Bytes,
}

impl ApiResponse {
    /// Response with the canonical reason phrase for `status`.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        let status_text = StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            status,
            status_text,
            body: body.into(),
        }
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON. An empty body decodes as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        let body: &[u8] = if self.body.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &self.body
        };
        serde_json::from_slice(body).map_err(|err| RequestError::Decode(err.to_string()))
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, RequestError>;
}

/// [`HttpTransport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, RequestError> {
        let client = Client::builder().user_agent(Self::user_agent()).build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub fn user_agent() -> &'static str {
        concat!("pagewire/", env!("CARGO_PKG_VERSION"))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, RequestError> {
        let ApiRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        Ok(ApiResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn ok_covers_the_2xx_range_only() {
        assert!(ApiResponse::new(200, "{}").ok());
        assert!(ApiResponse::new(204, "").ok());
        assert!(!ApiResponse::new(304, "").ok());
        assert!(!ApiResponse::new(500, "").ok());
    }

    #[test]
    fn status_text_uses_canonical_reason() {
        assert_eq!(ApiResponse::new(503, "").status_text, "Service Unavailable");
    }

    #[test]
    fn empty_body_decodes_as_null() {
        let value: Value = ApiResponse::new(204, "").json().expect("null body");
        assert_eq!(value, Value::Null);
        ApiResponse::new(204, "  ")
            .json::<()>()
            .expect("unit body");
    }

    #[test]
    fn malformed_body_is_a_decode_error() {
        let result = ApiResponse::new(200, "{not json").json::<Value>();
        assert!(matches!(result, Err(RequestError::Decode(_))));
        let parsed: Value = ApiResponse::new(200, r#"{"id":1}"#).json().expect("json");
        assert_eq!(parsed, json!({"id": 1}));
    }
}
