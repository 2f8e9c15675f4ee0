use core_async::time::Duration;
use core_runtime::config::{
    MirrorConfig, RunMode, DEFAULT_COLLECTION_SUFFIX, DEFAULT_LOCK_TTL_SECS, DEFAULT_PAGE_DELAY,
    DEFAULT_PAGE_SIZE,
};
use core_schema::CollectionDescriptor;

use crate::fetcher::FetchPolicy;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Where the SDL document is fetched from
    pub schema_url: String,

    /// `limit` sent with every page request
    pub page_size: u32,

    /// Pause between consecutive pages of one collection
    pub page_delay: Duration,

    /// Lease lifetime in seconds
    pub lock_ttl_secs: i64,

    pub mode: RunMode,

    /// Allow-list of collection or element type names. Empty selects all.
    pub collections: Vec<String>,

    /// Type-name suffix that marks a collection type
    pub collection_suffix: String,

    pub fetch_policy: FetchPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            schema_url: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
            page_delay: DEFAULT_PAGE_DELAY,
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            mode: RunMode::OneShot,
            collections: Vec::new(),
            collection_suffix: DEFAULT_COLLECTION_SUFFIX.to_string(),
            fetch_policy: FetchPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn is_selected(&self, descriptor: &CollectionDescriptor) -> bool {
        self.collections.is_empty()
            || self.collections.iter().any(|name| {
                name == &descriptor.collection_name || name == &descriptor.element_type_name
            })
    }
}

impl From<&MirrorConfig> for SyncConfig {
    fn from(config: &MirrorConfig) -> Self {
        Self {
            schema_url: config.schema_url.clone(),
            page_size: config.page_size,
            page_delay: config.page_delay,
            lock_ttl_secs: config.lock_ttl_secs,
            mode: config.mode,
            collections: config.collections.clone(),
            collection_suffix: config.collection_suffix.clone(),
            fetch_policy: FetchPolicy {
                max_attempts: config.max_attempts,
                retry_base_delay: config.retry_base_delay,
                min_reset_delay: config.min_reset_delay,
                ..FetchPolicy::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_runtime::config::{Credentials, EndpointSource};
    use core_schema::FieldDescriptor;

    fn widget() -> CollectionDescriptor {
        CollectionDescriptor::new(
            "WidgetCollection",
            "Widget",
            vec![FieldDescriptor::new("id", "ID")],
        )
    }

    #[test]
    fn test_empty_allow_list_selects_all() {
        assert!(SyncConfig::default().is_selected(&widget()));
    }

    #[test]
    fn test_allow_list_matches_either_name() {
        let mut config = SyncConfig::default();

        config.collections = vec!["WidgetCollection".to_string()];
        assert!(config.is_selected(&widget()));

        config.collections = vec!["Widget".to_string()];
        assert!(config.is_selected(&widget()));

        config.collections = vec!["GadgetCollection".to_string()];
        assert!(!config.is_selected(&widget()));
    }

    #[test]
    fn test_from_mirror_config() {
        let mirror = MirrorConfig::builder()
            .schema_url("https://api.example.com/schema.graphql")
            .endpoint(EndpointSource::Static("https://api.example.com/graphql".into()))
            .credentials(Credentials::Static("tok".into()))
            .page_size(50)
            .max_attempts(5)
            .retry_base_delay(Duration::from_millis(250))
            .collections(["WidgetCollection"])
            .build()
            .unwrap();

        let config = SyncConfig::from(&mirror);
        assert_eq!(config.schema_url, "https://api.example.com/schema.graphql");
        assert_eq!(config.page_size, 50);
        assert_eq!(config.lock_ttl_secs, 30);
        assert_eq!(config.fetch_policy.max_attempts, 5);
        assert_eq!(config.fetch_policy.retry_base_delay, Duration::from_millis(250));
        assert_eq!(config.collections, vec!["WidgetCollection"]);
    }
}
