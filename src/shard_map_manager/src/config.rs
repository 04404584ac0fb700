use std::sync::Arc;

use cache::MappingCache;
use derive_builder::Builder;
use logger::Logger;
use retry::{ExponentialBackoffPolicy, RetryPolicy};
use store::{GlobalStore, LocalStoreFactory};

/// Construction-time configuration for a [`crate::ShardMapManager`]
/// (spec.md §6: "Environment: None read by the core" — this is a plain
/// struct built via [`ShardMapManagerConfigBuilder`], never a file/env
/// loader).
///
/// `store_operation_factory` and `credentials` are present as explicit
/// unit-typed placeholders, per §6's recognized-options list, reserved for
/// the out-of-scope SQL transport; this crate never reads either.
#[derive(Clone, Builder)]
#[builder(pattern = "owned")]
pub struct ShardMapManagerConfig {
    pub global_store: Arc<dyn GlobalStore>,
    pub local_store_factory: Arc<dyn LocalStoreFactory>,
    #[builder(default = "Arc::new(MappingCache::new())")]
    pub cache_store: Arc<MappingCache>,
    #[builder(default = "Arc::new(ExponentialBackoffPolicy::default())")]
    pub retry_policy: Arc<dyn RetryPolicy>,
    #[builder(default = "logger::nop_logger()")]
    pub log: Logger,
    #[builder(default)]
    pub store_operation_factory: (),
    #[builder(default)]
    pub credentials: (),
}
