use async_trait::async_trait;

use crate::{request::StoreRequest, Result, StoreResult};

/// A transactional scope in which arbitrarily many reads and writes compose
/// atomically (spec.md §4.B). The operation engine always issues its whole
/// phase body through one [`StoreTransaction`] and either commits or rolls
/// back the lot.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn execute(&mut self, request: StoreRequest) -> Result<StoreResult>;

    async fn commit(self: Box<Self>) -> Result<StoreResult>;

    async fn rollback(self: Box<Self>);
}
