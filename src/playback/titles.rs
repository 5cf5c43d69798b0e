use std::sync::Arc;
use moka::future::Cache;
use crate::playback::driver::{MediaInfo, Transport};
use crate::playback::Request;

/// Titles for listing pending requests. Resolving media is expensive, so
/// lookups are remembered per URL when a cache is configured.
pub struct TitleLookup {
    transport: Arc<dyn Transport>,
    cache: Option<Cache<String, MediaInfo>>,
}

impl TitleLookup {
    pub fn new(transport: Arc<dyn Transport>, capacity: Option<u64>) -> Self {
        Self {
            transport,
            cache: capacity.map(Cache::new),
        }
    }

    /// `None` when the media cannot be described; callers show a placeholder.
    pub async fn title(&self, request: &Request) -> Option<String> {
        if let Some(hint) = &request.title_hint {
            return Some(hint.clone());
        }

        let key = request.url.to_string();
        if let Some(cache) = &self.cache {
            if let Some(info) = cache.get(&key).await {
                return Some(info.title);
            }
        }

        let info = match self.transport.describe(&request.url).await {
            Ok(info) => info,
            Err(err) => {
                tracing::debug!("No title for {}: {}", key, err);
                return None;
            }
        };

        if let Some(cache) = &self.cache {
            cache.insert(key, info.clone()).await;
        }

        Some(info.title).filter(|t| !t.is_empty())
    }
}
