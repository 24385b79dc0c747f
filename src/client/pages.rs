//! Typed access to the CMS page resource.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::api::CachedApiClient;
use super::error::RequestError;
use super::options::CacheOptions;
use crate::cache::QueryParams;
use crate::cache::keys::page_endpoint;
use crate::swr::{Resource, SwrController, SwrOptions};

pub const DEFAULT_PAGE_SLUG: &str = "home";

const PAGES_ENDPOINT: &str = "/api/pages";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData {
    pub id: String,
    pub slug: String,
    /// Layout blocks, rendered elsewhere.
    #[serde(default)]
    pub layout: Vec<Value>,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(rename = "_status", default)]
    pub status: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    Published,
    Draft,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePage {
    pub title: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PageStatus>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdatePage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PageStatus>,
}

/// Options of [`PagesApi::page_data`].
#[derive(Debug, Clone, Default)]
pub struct PageDataOptions {
    pub initial_data: Option<PageData>,
    pub swr: SwrOptions,
}

#[derive(Clone)]
pub struct PagesApi {
    client: CachedApiClient,
}

impl PagesApi {
    pub fn new(client: CachedApiClient) -> Self {
        Self { client }
    }

    pub async fn get_all(&self, params: Option<&QueryParams>) -> Result<Vec<PageData>, RequestError> {
        self.client
            .get(PAGES_ENDPOINT, params, &CacheOptions::default())
            .await
    }

    /// Page by slug; `use_cache = false` skips the cache read.
    pub async fn get_by_slug(&self, slug: &str, use_cache: bool) -> Result<PageData, RequestError> {
        let options = if use_cache {
            CacheOptions::default()
        } else {
            CacheOptions::bypass()
        };
        self.client.get(&page_endpoint(slug), None, &options).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<PageData, RequestError> {
        self.client
            .get(&format!("{PAGES_ENDPOINT}/{id}"), None, &CacheOptions::default())
            .await
    }

    pub async fn create(&self, page: &CreatePage) -> Result<PageData, RequestError> {
        self.client.post(PAGES_ENDPOINT, Some(page)).await
    }

    pub async fn update(&self, id: &str, page: &UpdatePage) -> Result<PageData, RequestError> {
        self.client
            .put(&format!("{PAGES_ENDPOINT}/{id}"), Some(page))
            .await
    }

    /// Returns whatever the CMS answers with, `null` for an empty body.
    pub async fn delete(&self, id: &str) -> Result<Value, RequestError> {
        self.client.delete(&format!("{PAGES_ENDPOINT}/{id}")).await
    }

    /// Stale-while-revalidate reader for a page; `None` reads the home page.
    ///
    /// Nothing is fetched until [`SwrController::load`] is called.
    pub fn page_data(&self, slug: Option<&str>, options: PageDataOptions) -> SwrController<PageData> {
        let slug = slug.unwrap_or(DEFAULT_PAGE_SLUG);
        let controller = SwrController::new(
            self.client.clone(),
            Resource::new(page_endpoint(slug)),
            options.swr,
        );
        match options.initial_data {
            Some(page) => controller.with_initial_data(page),
            None => controller,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn page_data_keeps_unknown_fields() {
        let raw = json!({
            "id": "1",
            "slug": "home",
            "layout": [{"blockType": "hero"}],
            "updatedAt": "2025-01-02T00:00:00Z",
            "createdAt": "2025-01-01T00:00:00Z",
            "_status": "published",
            "title": "Home"
        });

        let page: PageData = serde_json::from_value(raw.clone()).expect("decode");
        assert_eq!(page.status, "published");
        assert_eq!(page.extra.get("title"), Some(&json!("Home")));
        assert_eq!(serde_json::to_value(&page).expect("encode"), raw);
    }

    #[test]
    fn update_omits_unset_fields() {
        let update = UpdatePage {
            status: Some(PageStatus::Draft),
            ..UpdatePage::default()
        };
        assert_eq!(
            serde_json::to_value(&update).expect("encode"),
            json!({"status": "draft"})
        );
    }
}
