use crate::api::ApiClient;
use crate::cache::ReferenceCache;
use crate::config::ServiceType;
use crate::error::ApiError;
use crate::models::api::{Category, Tag};
use crate::storage::KeyValueStore;
use std::sync::Arc;

pub const CATEGORIES_KEY: &str = "blog_categories";
pub const TAGS_KEY: &str = "blog_tags";

/// Categories and tags of the blog, cached for a few minutes.
pub struct CatalogService {
    api: Arc<ApiClient>,
    categories: ReferenceCache<Vec<Category>>,
    tags: ReferenceCache<Vec<Tag>>,
}

impl CatalogService {
    pub fn new(api: Arc<ApiClient>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            api,
            categories: ReferenceCache::new(CATEGORIES_KEY, store.clone()),
            tags: ReferenceCache::new(TAGS_KEY, store),
        }
    }

    pub async fn categories(&self, force_refresh: bool) -> Result<Vec<Category>, ApiError> {
        self.categories
            .get_or_fetch(force_refresh, || async {
                let categories: Option<Vec<Category>> = self.api.get(ServiceType::Main, "categories", &[]).await?;
                Ok(categories.unwrap_or_default())
            })
            .await
    }

    pub async fn tags(&self, force_refresh: bool) -> Result<Vec<Tag>, ApiError> {
        self.tags
            .get_or_fetch(force_refresh, || async {
                let tags: Option<Vec<Tag>> = self.api.get(ServiceType::Main, "tags", &[]).await?;
                Ok(tags.unwrap_or_default())
            })
            .await
    }

    pub async fn clear_categories(&self) {
        self.categories.invalidate().await;
    }

    pub async fn clear_tags(&self) {
        self.tags.invalidate().await;
    }
}
