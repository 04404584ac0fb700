use std::time::Instant;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{context::OpContext, error, phase::OperationCode, support, Phase, Result};

/// One step of the phase diagram in spec.md §4.C. `Ok(())` advances the
/// engine; `Err` triggers the undo chain (for `local_source`, `local_target`
/// and `global_post`) or is returned directly (for `global_pre`).
pub type PhaseResult = Result<()>;

/// A single catalog operation, expressed as the sequence of phases it needs.
///
/// Implementors only override the phases relevant to them: a single-shard
/// operation with nothing to undo can implement just `global_pre` and
/// `local_source` and inherit no-op defaults for the rest. The engine calls
/// every phase in order regardless, so a no-op default must really be a
/// no-op and not silently skip required work.
#[async_trait]
pub trait ShardMapOperation: Send {
    fn code(&self) -> OperationCode;

    fn operation_id(&self) -> Uuid;

    /// Validate, stage the intent in the pending-operation log, and perform
    /// whatever global-catalog mutation doesn't require a shard round-trip
    /// first. Implementations open their own global store transaction and
    /// commit it before returning (spec.md §4.C: "the intent write, the
    /// version bump and the pending-log insert happen in one transaction").
    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult;

    async fn local_source(&mut self, _ctx: &OpContext) -> PhaseResult {
        Ok(())
    }

    async fn local_target(&mut self, _ctx: &OpContext) -> PhaseResult {
        Ok(())
    }

    /// Finalize the global catalog (e.g. remove the pending-log row, flip
    /// mapping status online). Runs after both local phases succeed.
    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult;

    async fn update_cache(&mut self, _ctx: &OpContext) -> PhaseResult {
        Ok(())
    }

    async fn undo_local_target(&mut self, _ctx: &OpContext) -> PhaseResult {
        Ok(())
    }

    async fn undo_local_source(&mut self, _ctx: &OpContext) -> PhaseResult {
        Ok(())
    }

    /// Revert whatever `global_pre` staged. Must be safe to call even if
    /// `global_pre` never ran to completion from a previous attempt
    /// (recovery replays undo from a conservative start state).
    async fn undo_global_post(&mut self, _ctx: &OpContext) -> PhaseResult {
        Ok(())
    }
}

/// Drives a [`ShardMapOperation`] through the phase diagram in spec.md
/// §4.C: `GlobalPre -> LocalSource -> LocalTarget -> GlobalPost ->
/// UpdateCache`, each phase wrapped in the context's retry policy, with
/// deadline/cancellation checked only at phase boundaries. Any terminal
/// failure from `LocalSource`, `LocalTarget` or `GlobalPost` runs the undo
/// chain (`UndoLocalTarget -> UndoLocalSource -> UndoGlobalPost`) before the
/// original error is returned.
pub struct OperationEngine {
    ctx: OpContext,
}

impl OperationEngine {
    pub fn new(ctx: OpContext) -> Self {
        OperationEngine { ctx }
    }

    pub async fn execute(
        &self,
        mut op: impl ShardMapOperation,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let op_id = op.operation_id();
        self.check_deadline(deadline)?;

        self.run_phase("global_pre", |ctx| op.global_pre(ctx)).await?;

        // Tracks the undo chain needed if we crash partway through the phase
        // we're about to attempt, updated just before attempting it -- a
        // phase can partially apply its effect and then fail (spec.md §4.C).
        // `local_target` hasn't run yet at this point, so a crash during
        // `local_source` only ever needs undo starting at `undo_local_source`.
        let mut reached = Phase::UndoLocalSource;

        let outcome = async {
            self.check_deadline(deadline)?;
            self.advance_undo_start_state(op_id, reached).await;
            self.run_phase("local_source", |ctx| op.local_source(ctx)).await?;
            self.check_deadline(deadline)?;
            // `local_source` has now succeeded, so a crash during
            // `local_target` needs the full chain, starting at
            // `undo_local_target`.
            reached = Phase::UndoLocalTarget;
            self.advance_undo_start_state(op_id, reached).await;
            self.run_phase("local_target", |ctx| op.local_target(ctx)).await?;
            self.check_deadline(deadline)?;
            self.run_phase("global_post", |ctx| op.global_post(ctx)).await
        }
        .await;

        if let Err(err) = outcome {
            self.undo(&mut op, op_id, reached).await;
            return Err(err);
        }

        // Cache update is best-effort: a stale/missing cache entry is
        // corrected on next lookup (spec.md §4.D), so failures here don't
        // roll the operation back.
        if let Err(err) = self.run_phase("update_cache", |ctx| op.update_cache(ctx)).await {
            logger::warn!(self.ctx.log, "cache update phase failed, continuing";
                "operation_id" => %op_id, "err" => %err);
        }

        Ok(())
    }

    /// Runs only the undo chain for `op` starting at `start`, without ever
    /// calling its forward phases. Used by crash recovery (spec.md §4.F)
    /// when replaying a pending-log row left behind by a process that died
    /// mid-operation: the forward phases may or may not have run, so
    /// recovery only ever drives operations backward, never forward. `start`
    /// comes from the pending-log row's `undo_start_state`, recorded by
    /// [`OperationEngine::execute`] as it went.
    pub async fn run_undo_from(&self, mut op: impl ShardMapOperation, start: Phase) {
        let op_id = op.operation_id();
        self.undo(&mut op, op_id, start).await;
    }

    async fn undo(&self, op: &mut impl ShardMapOperation, op_id: Uuid, start: Phase) {
        let start_step = match start {
            Phase::UndoLocalSource => 1,
            Phase::UndoGlobalPost => 2,
            // `UndoLocalTarget` and anything unexpected (e.g. a freshly
            // created row, or one from before this field was tracked
            // precisely) run the full chain -- the conservative choice.
            _ => 0,
        };
        for (name, step) in [
            ("undo_local_target", 0),
            ("undo_local_source", 1),
            ("undo_global_post", 2),
        ] {
            if step < start_step {
                continue;
            }
            let result = match step {
                0 => self.run_phase(name, |ctx| op.undo_local_target(ctx)).await,
                1 => self.run_phase(name, |ctx| op.undo_local_source(ctx)).await,
                _ => self.run_phase(name, |ctx| op.undo_global_post(ctx)).await,
            };
            if let Err(source) = result {
                logger::error!(self.ctx.log, "undo phase failed, leaving pending-log entry for recovery";
                    "operation_id" => %op_id, "phase" => name, "err" => %source);
                // Recovery (spec.md §4.F) owns cleanup from here; the
                // pending-log row for this operation is left untouched.
                return;
            }
        }
    }

    /// Best-effort: a failure here just means recovery falls back to running
    /// the full undo chain for this operation, which is always safe.
    async fn advance_undo_start_state(&self, operation_id: Uuid, phase: Phase) {
        if let Err(err) = support::advance_undo_start_state(&self.ctx, operation_id, phase).await {
            logger::warn!(self.ctx.log, "failed to advance undo_start_state, continuing";
                "operation_id" => %operation_id, "phase" => phase.as_str(), "err" => %err);
        }
    }

    async fn run_phase<'a, F, Fut>(&'a self, name: &'static str, mut f: F) -> Result<()>
    where
        F: FnMut(&'a OpContext) -> Fut,
        Fut: std::future::Future<Output = Result<()>> + 'a,
    {
        retry::retry(self.ctx.retry_policy.as_ref(), name, &self.ctx.log, || f(&self.ctx)).await
    }

    fn check_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        if let Some(d) = deadline {
            if Instant::now() >= d {
                return error::CanceledSnafu.fail();
            }
        }
        Ok(())
    }
}
