use crate::algorithms::optimizer::MomentumSgd;
use crate::algorithms::{EmbeddingModel, IncrementalSynthesizer};
use crate::config::{ServiceConfig, SynthesizerConfig};
use crate::error::Result;
use crate::models::UpdateReport;
use crate::utils::validation::validate_batch_size;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_BATCH_SIZE: usize = 1_000_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColdStartStats {
    pub batches: u64,
    pub items_synthesized: u64,
    pub total_elapsed: Duration,
    pub last_batch_id: Option<Uuid>,
    pub last_final_loss: Option<f64>,
    pub last_completed_at: Option<DateTime<Utc>>,
}

/// Owns a model and feeds streams of new items through the synthesizer.
///
/// One `ingest` call takes a single snapshot and reconstructs every item
/// against it, then writes the results back in fixed-size batches, each
/// with its own refinement run and report.
pub struct ColdStartService<M: EmbeddingModel> {
    model: M,
    synthesizer: IncrementalSynthesizer,
    batch_size: usize,
    optimizer: Option<MomentumSgd>,
    stats: ColdStartStats,
}

impl<M: EmbeddingModel> ColdStartService<M> {
    pub fn new(
        model: M,
        synthesizer_config: SynthesizerConfig,
        service_config: &ServiceConfig,
    ) -> Result<Self> {
        validate_batch_size(service_config.batch_size, MAX_BATCH_SIZE)?;
        let synthesizer = IncrementalSynthesizer::new(synthesizer_config)?;

        // A long-lived optimizer keeps momentum from one batch to the next.
        let optimizer = service_config
            .persist_momentum
            .then(|| synthesizer.new_optimizer());

        Ok(Self {
            model,
            synthesizer,
            batch_size: service_config.batch_size,
            optimizer,
            stats: ColdStartStats::default(),
        })
    }

    /// Synthesizes embeddings for `item_ids`, writing them back batch by
    /// batch.
    ///
    /// Every id of the call is excluded from every neighbourhood, and all
    /// targets are computed before the first write, so a failure leaves
    /// the model untouched.
    pub fn ingest(&mut self, dataset: &M::Dataset, item_ids: &[usize]) -> Result<Vec<UpdateReport>> {
        let targets = self
            .synthesizer
            .reconstruct_targets(&self.model, dataset, item_ids)
            .map_err(|e| {
                warn!(items = item_ids.len(), "cold-start ingestion failed: {}", e);
                e
            })?;

        let mut reports = Vec::with_capacity(targets.len().div_ceil(self.batch_size));
        let mut pending = targets.into_iter().peekable();

        while pending.peek().is_some() {
            let batch: Vec<_> = pending.by_ref().take(self.batch_size).collect();
            let report = match self.optimizer.as_mut() {
                Some(optimizer) => self.synthesizer.apply_targets(&mut self.model, batch, optimizer)?,
                None => {
                    let mut optimizer = self.synthesizer.new_optimizer();
                    self.synthesizer
                        .apply_targets(&mut self.model, batch, &mut optimizer)?
                }
            };

            self.record(&report);
            reports.push(report);
        }

        info!(
            batches = reports.len(),
            items = item_ids.len(),
            "cold-start ingestion finished"
        );
        Ok(reports)
    }

    fn record(&mut self, report: &UpdateReport) {
        self.stats.batches += 1;
        self.stats.items_synthesized += report.n_new as u64;
        self.stats.total_elapsed += report.elapsed_time;
        self.stats.last_batch_id = Some(report.batch_id);
        self.stats.last_final_loss = report.final_loss();
        self.stats.last_completed_at = Some(report.completed_at);
    }

    pub fn stats(&self) -> &ColdStartStats {
        &self.stats
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn synthesizer(&self) -> &IncrementalSynthesizer {
        &self.synthesizer
    }

    /// The optimizer shared across batches, when momentum is persisted.
    pub fn optimizer(&self) -> Option<&MomentumSgd> {
        self.optimizer.as_ref()
    }
}
