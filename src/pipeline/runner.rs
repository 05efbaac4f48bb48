//! Pipeline runner
//!
//! Executes the ordered stage list against one document and returns its
//! final state. Stage errors are handled here: they turn the document into
//! an error and end the run, without ever escaping to the caller.

use crate::checksum::{ChecksumStore, Checksummer};
use crate::config::Config;
use crate::document::{DocState, DocumentRecord, FetchPhase};
use crate::filter::FilterChain;
use crate::pipeline::{Flow, PipelineContext, Stage};
use crate::ConfigResult;
use std::sync::Arc;

/// Ordered stages plus the checksum store they consult
pub struct Pipeline {
    stages: Vec<Stage>,
    store: Arc<dyn ChecksumStore>,
}

impl Pipeline {
    /// Creates a pipeline with no stages
    pub fn new(store: Arc<dyn ChecksumStore>) -> Self {
        Self {
            stages: Vec::new(),
            store,
        }
    }

    /// Appends a stage
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Builds the standard pipeline from configuration
    ///
    /// Stage order is metadata filter, content filter, checksum. A filter
    /// stage is only added when it has at least one rule.
    ///
    /// # Arguments
    ///
    /// * `config` - Loaded configuration
    /// * `store` - Checksum store shared with the commit queue
    pub fn from_config(config: &Config, store: Arc<dyn ChecksumStore>) -> ConfigResult<Self> {
        let no_match = config.pipeline.on_no_match;
        let mut pipeline = Self::new(store);

        if !config.metadata_filters.is_empty() {
            pipeline = pipeline.with_stage(Stage::MetadataFilter(FilterChain::from_config(
                &config.metadata_filters,
                no_match,
                false,
            )?));
        }
        if !config.content_filters.is_empty() {
            pipeline = pipeline.with_stage(Stage::ContentFilter(FilterChain::from_config(
                &config.content_filters,
                no_match,
                true,
            )?));
        }
        if let Some(checksum) = &config.checksum {
            pipeline = pipeline.with_stage(Stage::Checksum(Checksummer::from_config(checksum)?));
        }

        Ok(pipeline)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn store(&self) -> &Arc<dyn ChecksumStore> {
        &self.store
    }

    /// Runs every applicable stage against the context's record
    ///
    /// Deleted records skip all stages. A record nobody decided on ends up
    /// new.
    pub fn run(&self, ctx: &mut PipelineContext<'_>) -> DocState {
        if ctx.record.state() == Some(DocState::Deleted) {
            tracing::debug!("{} deleted, skipping stages", ctx.reference());
            return DocState::Deleted;
        }

        let phase = ctx.phase;
        for stage in self.stages.iter().filter(|s| s.applies_to(phase)) {
            let outcome = match stage.execute(ctx) {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!("{} failed in {} stage: {}", ctx.reference(), stage.name(), e);
                    ctx.record.mark_error();
                    break;
                }
            };

            if let Some(state) = outcome.state {
                if let Err(e) = ctx.record.set_state(state) {
                    tracing::warn!("{}: {}", ctx.reference(), e);
                    break;
                }
            }

            if outcome.flow == Flow::Stop {
                break;
            }
        }

        match ctx.record.state() {
            Some(state) => state,
            None => {
                // Nothing rejected it and no checksum stage ran.
                let _ = ctx.record.set_state(DocState::New);
                DocState::New
            }
        }
    }

    /// Convenience wrapper building the context for a record
    pub fn evaluate(&self, record: &mut DocumentRecord, phase: FetchPhase) -> DocState {
        let mut ctx = PipelineContext::new(record, phase, self.store.as_ref());
        let state = self.run(&mut ctx);
        tracing::debug!("{} evaluated as {} ({:?} phase)", record.reference, state, phase);
        state
    }
}
