use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use store::{GlobalStore, StoreRequest, StoreRow};
use uuid::Uuid;

use crate::{context::OpContext, engine::PhaseResult, phase::OperationCode, support, ShardMapOperation};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddSchemaInfoOp {
    pub operation_id: Uuid,
    pub name: String,
    pub info: String,
}

impl AddSchemaInfoOp {
    pub fn new(name: impl Into<String>, info: impl Into<String>) -> Self {
        AddSchemaInfoOp {
            operation_id: Uuid::new_v4(),
            name: name.into(),
            info: info.into(),
        }
    }
}

#[async_trait]
impl ShardMapOperation for AddSchemaInfoOp {
    fn code(&self) -> OperationCode {
        OperationCode::AddSchemaInfo
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        let result = txn
            .execute(StoreRequest::AddSchemaInfo { name: self.name.clone(), info: self.info.clone() })
            .await?;
        support::ensure_success(result, format!("schema info {} already exists", self.name))?;
        let log_row = support::pending_log_row(self.operation_id, self.code(), self, HashMap::new())?;
        txn.execute(StoreRequest::AddPendingOperation(log_row)).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        support::clear_pending_log(ctx, self.operation_id).await
    }

    async fn undo_global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        txn.execute(StoreRequest::RemoveSchemaInfo { name: self.name.clone() }).await.ok();
        txn.execute(StoreRequest::RemovePendingOperation { operation_id: self.operation_id })
            .await?;
        txn.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveSchemaInfoOp {
    pub operation_id: Uuid,
    pub name: String,
    /// The info string `global_pre` removed, captured so undo can put it
    /// back verbatim.
    #[serde(skip)]
    pub removed_info: Option<String>,
}

impl RemoveSchemaInfoOp {
    pub fn new(name: impl Into<String>) -> Self {
        RemoveSchemaInfoOp {
            operation_id: Uuid::new_v4(),
            name: name.into(),
            removed_info: None,
        }
    }
}

#[async_trait]
impl ShardMapOperation for RemoveSchemaInfoOp {
    fn code(&self) -> OperationCode {
        OperationCode::RemoveSchemaInfo
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        let existing = txn.execute(StoreRequest::GetSchemaInfo { name: self.name.clone() }).await?;
        if let Some(StoreRow::SchemaInfo { info, .. }) = existing.rows.into_iter().next() {
            self.removed_info = Some(info);
        }
        let result = txn.execute(StoreRequest::RemoveSchemaInfo { name: self.name.clone() }).await?;
        support::ensure_success(result, format!("schema info {} does not exist", self.name))?;
        let log_row = support::pending_log_row(self.operation_id, self.code(), self, HashMap::new())?;
        txn.execute(StoreRequest::AddPendingOperation(log_row)).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        support::clear_pending_log(ctx, self.operation_id).await
    }

    async fn undo_global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        let Some(info) = self.removed_info.clone() else { return Ok(()) };
        let mut txn = ctx.global_store.begin().await?;
        txn.execute(StoreRequest::AddSchemaInfo { name: self.name.clone(), info }).await.ok();
        txn.execute(StoreRequest::RemovePendingOperation { operation_id: self.operation_id })
            .await?;
        txn.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSchemaInfoOp {
    pub operation_id: Uuid,
    pub name: String,
    pub info: String,
    /// The info string `global_pre` overwrote, captured so undo can
    /// restore it.
    #[serde(skip)]
    pub previous_info: Option<String>,
}

impl UpdateSchemaInfoOp {
    pub fn new(name: impl Into<String>, info: impl Into<String>) -> Self {
        UpdateSchemaInfoOp {
            operation_id: Uuid::new_v4(),
            name: name.into(),
            info: info.into(),
            previous_info: None,
        }
    }
}

#[async_trait]
impl ShardMapOperation for UpdateSchemaInfoOp {
    fn code(&self) -> OperationCode {
        OperationCode::UpdateSchemaInfo
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        let existing = txn.execute(StoreRequest::GetSchemaInfo { name: self.name.clone() }).await?;
        if let Some(StoreRow::SchemaInfo { info, .. }) = existing.rows.into_iter().next() {
            self.previous_info = Some(info);
        }
        let result = txn
            .execute(StoreRequest::UpdateSchemaInfo { name: self.name.clone(), info: self.info.clone() })
            .await?;
        support::ensure_success(result, format!("schema info {} does not exist", self.name))?;
        let log_row = support::pending_log_row(self.operation_id, self.code(), self, HashMap::new())?;
        txn.execute(StoreRequest::AddPendingOperation(log_row)).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        support::clear_pending_log(ctx, self.operation_id).await
    }

    async fn undo_global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        let Some(info) = self.previous_info.clone() else { return Ok(()) };
        let mut txn = ctx.global_store.begin().await?;
        txn.execute(StoreRequest::UpdateSchemaInfo { name: self.name.clone(), info }).await.ok();
        txn.execute(StoreRequest::RemovePendingOperation { operation_id: self.operation_id })
            .await?;
        txn.commit().await?;
        Ok(())
    }
}
