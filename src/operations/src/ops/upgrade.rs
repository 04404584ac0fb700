use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use store::{GlobalStore, StoreRequest, StoreRow};
use uuid::Uuid;

use crate::{context::OpContext, engine::PhaseResult, phase::OperationCode, support, ShardMapOperation};

/// The schema version this binary expects the global catalog to be at.
/// Bumped whenever a new upgrade step is added below.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Brings the global catalog's schema version up to [`CURRENT_SCHEMA_VERSION`].
/// Idempotent: re-running it against an already-current catalog is a no-op,
/// per spec.md §6's "idempotent replay-safe DDL" translated here to
/// idempotent upserts against the store trait (there is no SQL transport in
/// this crate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeStoreOp {
    pub operation_id: Uuid,
    pub target_version: u32,
}

impl UpgradeStoreOp {
    pub fn new() -> Self {
        UpgradeStoreOp {
            operation_id: Uuid::new_v4(),
            target_version: CURRENT_SCHEMA_VERSION,
        }
    }
}

impl Default for UpgradeStoreOp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShardMapOperation for UpgradeStoreOp {
    fn code(&self) -> OperationCode {
        OperationCode::UpgradeStore
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        let current = txn.execute(StoreRequest::GetSchemaVersion).await?;
        let current_version = match current.rows.into_iter().next() {
            Some(StoreRow::SchemaVersion(v)) => v,
            _ => 0,
        };
        if current_version >= self.target_version {
            txn.commit().await?;
            return Ok(());
        }
        txn.execute(StoreRequest::SetSchemaVersion { version: self.target_version }).await?;
        let log_row = support::pending_log_row(self.operation_id, self.code(), self, HashMap::new())?;
        txn.execute(StoreRequest::AddPendingOperation(log_row)).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        support::clear_pending_log(ctx, self.operation_id).await
    }
}
