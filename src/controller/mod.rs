//! Pipeline sequencing and the checkpoint gate
//!
//! [`ClusterController`] runs the create and destroy pipelines for one
//! cluster. Every step goes through the same executor: re-read the record,
//! skip if the checkpoint is done, run, then persist the output and the new
//! checkpoint in one patch. Failures are persisted before they propagate.

mod context;
pub mod steps;

pub use context::{PipelineContext, PipelineContextBuilder, Services};
pub use steps::{DestroyStep, PipelineStep};

use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterPatch, ClusterRecord, ClusterStatus, StepId, StepOutput};
use crate::{Error, Result};

/// Drives the pipelines for one cluster
pub struct ClusterController {
    ctx: PipelineContext,
}

impl ClusterController {
    /// Controller over a built context
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// Shared context
    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Store a fresh record, or mark an existing one as provisioning again.
    ///
    /// An existing record keeps its ID, credentials and checkpoints; `record`
    /// is only used when the name is new.
    pub async fn initialize(&self, record: ClusterRecord) -> Result<ClusterRecord> {
        let store = &self.ctx.services.store;
        match store.get_cluster(&self.ctx.cluster_name).await {
            Ok(existing) => {
                info!(
                    cluster = %existing.cluster_name,
                    cluster_id = %existing.cluster_id,
                    "Resuming existing cluster"
                );
                store
                    .update_cluster(
                        &self.ctx.cluster_name,
                        ClusterPatch::status(ClusterStatus::Provisioning, true),
                    )
                    .await
            }
            Err(Error::NotFound(_)) => {
                info!(
                    cluster = %record.cluster_name,
                    cluster_id = %record.cluster_id,
                    "Creating cluster record"
                );
                store.insert_cluster(&record).await?;
                Ok(record)
            }
            Err(e) => Err(e),
        }
    }

    /// Run one step through the checkpoint gate
    pub async fn run_step(&self, step: &dyn PipelineStep) -> Result<()> {
        let id = step.id();
        let store = &self.ctx.services.store;
        let record = store.get_cluster(&self.ctx.cluster_name).await?;

        if record.checkpoints.is_done(id) {
            debug!(cluster = %record.cluster_name, step = %id, "Step already done, skipping");
            return Ok(());
        }

        info!(cluster = %record.cluster_name, step = %id, "Running step");
        match step.run(&self.ctx, &record).await {
            Ok(output) => {
                store
                    .update_cluster(&self.ctx.cluster_name, ClusterPatch::completed(id, output))
                    .await?;
                info!(cluster = %record.cluster_name, step = %id, "Step done");
                Ok(())
            }
            Err(e) => {
                let err = Error::step(id, e);
                error!(cluster = %record.cluster_name, step = %id, error = %err.report(), "Step failed");
                if let Err(store_err) = store
                    .update_cluster(
                        &self.ctx.cluster_name,
                        ClusterPatch::failed(id, err.report()),
                    )
                    .await
                {
                    warn!(
                        cluster = %record.cluster_name,
                        step = %id,
                        error = %store_err,
                        "Failed to record step failure"
                    );
                }
                Err(err)
            }
        }
    }

    /// Run every create step in order, stopping at the first failure
    pub async fn run_create(&self) -> Result<ClusterRecord> {
        for step in StepId::CREATE_ORDER {
            self.run_step(&step).await?;
        }

        let record = self.ctx.reload().await?;
        if record.status == ClusterStatus::Provisioned && !record.in_progress {
            return Ok(record);
        }
        self.ctx
            .services
            .store
            .update_cluster(
                &self.ctx.cluster_name,
                ClusterPatch::status(ClusterStatus::Provisioned, false),
            )
            .await
    }

    /// Run one destroy step if its create checkpoint was attempted
    pub async fn run_destroy_step(&self, step: DestroyStep) -> Result<()> {
        let record = self.ctx.reload().await?;
        let gate = step.gate();

        if !record.checkpoints.attempted(gate) {
            debug!(
                cluster = %record.cluster_name,
                step = %step,
                gate = %gate,
                "Nothing to remove, skipping"
            );
            return Ok(());
        }

        info!(cluster = %record.cluster_name, step = %step, "Running destroy step");
        step.run(&self.ctx, &record).await?;
        self.ctx
            .services
            .store
            .update_cluster(
                &self.ctx.cluster_name,
                ClusterPatch::cleared(&step.clears(), StepOutput::default()),
            )
            .await?;
        info!(cluster = %record.cluster_name, step = %step, "Destroy step done");
        Ok(())
    }

    /// Tear the cluster down in reverse dependency order
    pub async fn run_destroy(&self) -> Result<ClusterRecord> {
        let store = &self.ctx.services.store;
        store
            .update_cluster(
                &self.ctx.cluster_name,
                ClusterPatch::status(ClusterStatus::Deleting, true),
            )
            .await?;

        for step in DestroyStep::ORDER {
            if let Err(e) = self.run_destroy_step(step).await {
                let err = Error::step(step, e);
                error!(cluster = %self.ctx.cluster_name, step = %step, error = %err.report(), "Destroy step failed");
                if let Err(store_err) = store
                    .update_cluster(&self.ctx.cluster_name, ClusterPatch::aborted(err.report()))
                    .await
                {
                    warn!(cluster = %self.ctx.cluster_name, error = %store_err, "Failed to record destroy failure");
                }
                return Err(err);
            }
        }

        info!(cluster = %self.ctx.cluster_name, "Cluster deleted");
        store
            .update_cluster(
                &self.ctx.cluster_name,
                ClusterPatch::status(ClusterStatus::Deleted, false),
            )
            .await
    }

    /// Reset failed checkpoints to pending; returns the steps that were reset
    pub async fn reset_failed(&self) -> Result<Vec<StepId>> {
        let record = self.ctx.reload().await?;
        let failed = record.checkpoints.failed();
        if failed.is_empty() {
            return Ok(failed);
        }

        let mut patch = ClusterPatch::cleared(&failed, StepOutput::default());
        patch.output.in_progress = Some(false);
        self.ctx
            .services
            .store
            .update_cluster(&self.ctx.cluster_name, patch)
            .await?;

        for step in &failed {
            info!(cluster = %record.cluster_name, step = %step, "Failed checkpoint reset to pending");
        }
        Ok(failed)
    }
}
