use std::sync::Arc;

use cache::MappingCache;
use logger::Logger;
use retry::RetryPolicy;
use store::{GlobalStore, LocalStoreFactory};

/// Everything a [`crate::ShardMapOperation`] needs to run its phases:
/// the global catalog, a way to reach any shard's local catalog, the
/// mapping cache it updates on success, the retry policy each phase is
/// wrapped in, and a logger.
#[derive(Clone)]
pub struct OpContext {
    pub global_store: Arc<dyn GlobalStore>,
    pub local_store_factory: Arc<dyn LocalStoreFactory>,
    pub cache: Arc<MappingCache>,
    pub retry_policy: Arc<dyn RetryPolicy>,
    pub log: Logger,
}
