use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use httpmock::MockServer;
use pagewire::cache::CacheStore;
use pagewire::client::{
    CacheOptions, CachedApiClient, ClientOptions, PagesApi, ReqwestTransport, RequestError,
};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{Value, json};

fn client(server: &MockServer) -> CachedApiClient {
    let mut headers = HeaderMap::new();
    headers.insert("x-site", HeaderValue::from_static("agency"));
    let options = ClientOptions {
        headers,
        ..ClientOptions::default().with_base_url(server.base_url())
    };
    CachedApiClient::new(
        options,
        Arc::new(ReqwestTransport::new().expect("transport")),
        Arc::new(CacheStore::in_memory()),
    )
    .expect("client")
}

#[tokio::test]
async fn concurrent_identical_gets_reach_the_server_once() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET").path("/api/pages/slug/home");
        then.status(200)
            .header("content-type", "application/json")
            .delay(Duration::from_millis(200))
            .body(r#"{"id":"1","slug":"home"}"#);
    });
    let client = client(&server);

    let results = join_all((0..5).map(|_| {
        let client = client.clone();
        async move {
            client
                .get_value("/api/pages/slug/home", None, &CacheOptions::default())
                .await
        }
    }))
    .await;

    let expected = json!({"id": "1", "slug": "home"});
    assert!(results.iter().all(|result| result.as_ref() == Ok(&expected)));
    mock.assert_calls(1);
}

#[tokio::test]
async fn write_invalidates_cached_read() {
    let server = MockServer::start();
    let read = server.mock(|when, then| {
        when.method("GET").path("/api/pages/1");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"id":"1","slug":"about"}"#);
    });
    let write = server.mock(|when, then| {
        when.method("PUT")
            .path("/api/pages/1")
            .header("content-type", "application/json")
            .json_body(json!({"title": "About us"}));
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"id":"1","slug":"about"}"#);
    });
    let client = client(&server);

    let _: Value = client
        .get("/api/pages/1", None, &CacheOptions::default())
        .await
        .expect("first read");
    let _: Value = client
        .get("/api/pages/1", None, &CacheOptions::default())
        .await
        .expect("cached read");
    read.assert_calls(1);

    let _: Value = client
        .put("/api/pages/1", Some(&json!({"title": "About us"})))
        .await
        .expect("write");
    assert!(!client.has_cached_data("/api/pages/1", None));

    let _: Value = client
        .get("/api/pages/1", None, &CacheOptions::default())
        .await
        .expect("read after write");
    write.assert_calls(1);
    read.assert_calls(2);
}

#[tokio::test]
async fn error_status_surfaces_and_is_not_cached() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET").path("/api/pages/slug/missing");
        then.status(404).body("not found");
    });
    let client = client(&server);

    for _ in 0..2 {
        let result = client
            .get_value("/api/pages/slug/missing", None, &CacheOptions::default())
            .await;
        assert_eq!(result, Err(RequestError::status(404, "Not Found")));
    }

    mock.assert_calls(2);
    assert_eq!(client.store().size(), 0);
}

#[tokio::test]
async fn query_params_and_default_headers_are_sent() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET")
            .path("/api/pages")
            .query_param("status", "published")
            .query_param("limit", "10")
            .header("x-site", "agency")
            .header("content-type", "application/json");
        then.status(200)
            .header("content-type", "application/json")
            .body("[]");
    });
    let client = client(&server);
    let pages = PagesApi::new(client.clone());
    let params = match json!({"status": "published", "limit": 10, "cursor": null}) {
        Value::Object(map) => map,
        _ => unreachable!(),
    };

    let listed = pages.get_all(Some(&params)).await.expect("list");

    assert!(listed.is_empty());
    assert!(client.has_cached_data("/api/pages", Some(&params)));
    mock.assert();
}

#[tokio::test]
async fn pages_api_bypass_refreshes_the_cached_page() {
    let server = MockServer::start();
    let mut first = server.mock(|when, then| {
        when.method("GET").path("/api/pages/slug/home");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"id":"1","slug":"home","_status":"draft"}"#);
    });
    let client = client(&server);
    let pages = PagesApi::new(client.clone());

    let cached = pages.get_by_slug("home", true).await.expect("first");
    assert_eq!(cached.status, "draft");
    first.delete();

    let second = server.mock(|when, then| {
        when.method("GET").path("/api/pages/slug/home");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"id":"1","slug":"home","_status":"published"}"#);
    });

    let still_cached = pages.get_by_slug("home", true).await.expect("cached");
    assert_eq!(still_cached.status, "draft");
    let fresh = pages.get_by_slug("home", false).await.expect("bypass");
    assert_eq!(fresh.status, "published");
    let after = pages.get_by_slug("home", true).await.expect("after");
    assert_eq!(after.status, "published");
    second.assert_calls(1);
}

#[tokio::test]
async fn delete_accepts_an_empty_response() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("DELETE").path("/api/pages/9");
        then.status(204);
    });
    let client = client(&server);

    let body = PagesApi::new(client).delete("9").await.expect("delete");

    assert_eq!(body, Value::Null);
    mock.assert();
}
