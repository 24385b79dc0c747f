//! Cache key derivation.
//!
//! A request key is `METHOD:endpoint:params:body` where `endpoint` already
//! carries the encoded query string and `params` is the JSON form of the query
//! parameters. Identical requests always produce the same key.

use reqwest::Method;
use serde_json::{Map, Value};
use url::form_urlencoded;

/// Query parameters as passed by callers. `null` values are left out of the URL.
pub type QueryParams = Map<String, Value>;

/// Key for a request with the given method, endpoint, parameters and body.
pub fn request_key(
    method: &Method,
    endpoint: &str,
    params: Option<&QueryParams>,
    body: Option<&str>,
) -> String {
    let params = params
        .map(|params| Value::Object(params.clone()).to_string())
        .unwrap_or_default();
    let body = body.unwrap_or_default();
    format!("{method}:{endpoint}:{params}:{body}")
}

/// Key of the plain GET for `endpoint`, without parameters or body.
pub fn get_key(endpoint: &str) -> String {
    request_key(&Method::GET, endpoint, None, None)
}

/// Application-level key of a page looked up by slug.
pub fn page_key(slug: &str) -> String {
    format!("page:{slug}")
}

/// CMS endpoint of a page looked up by slug.
pub fn page_endpoint(slug: &str) -> String {
    format!("/api/pages/slug/{slug}")
}

/// Encoded query string for `params`, or `None` when nothing is left to send.
pub fn query_string(params: &QueryParams) -> Option<String> {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut appended = false;
    for (name, value) in params {
        let rendered = match value {
            Value::Null => continue,
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        serializer.append_pair(name, &rendered);
        appended = true;
    }
    appended.then(|| serializer.finish())
}

/// `endpoint` with the query string for `params` appended.
pub fn endpoint_with_query(endpoint: &str, params: Option<&QueryParams>) -> String {
    match params.and_then(query_string) {
        Some(query) => format!("{endpoint}?{query}"),
        None => endpoint.to_string(),
    }
}
