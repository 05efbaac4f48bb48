//! Pipeline stages
//!
//! Stages are a closed set of variants. Each one reports whether the
//! pipeline should go on and, optionally, the state it decided.

use crate::checksum::{classify, ChangeClass, Checksummer};
use crate::document::{DocState, FetchPhase};
use crate::filter::{Decision, FilterChain};
use crate::pipeline::PipelineContext;
use crate::StageError;

/// Whether the runner moves on to the next stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Result of executing one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOutcome {
    pub flow: Flow,
    pub state: Option<DocState>,
}

impl StageOutcome {
    /// Go on without deciding a state
    pub fn proceed() -> Self {
        Self {
            flow: Flow::Continue,
            state: None,
        }
    }

    /// Go on with a tentative state
    pub fn proceed_as(state: DocState) -> Self {
        Self {
            flow: Flow::Continue,
            state: Some(state),
        }
    }

    /// End the run with a final state
    pub fn stop(state: DocState) -> Self {
        Self {
            flow: Flow::Stop,
            state: Some(state),
        }
    }
}

/// One step of the evaluation pipeline
#[derive(Debug, Clone)]
pub enum Stage {
    /// Filter over metadata, runs in every phase
    MetadataFilter(FilterChain),

    /// Filter that may inspect content, runs once content is fetched
    ContentFilter(FilterChain),

    /// Signature computation and change classification
    Checksum(Checksummer),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MetadataFilter(_) => "metadata-filter",
            Self::ContentFilter(_) => "content-filter",
            Self::Checksum(_) => "checksum",
        }
    }

    /// Returns true if the stage has what it needs in the given phase
    pub fn applies_to(&self, phase: FetchPhase) -> bool {
        match self {
            Self::MetadataFilter(_) => true,
            Self::ContentFilter(_) => phase == FetchPhase::Document,
            Self::Checksum(checksummer) => {
                !checksummer.requires_content() || phase == FetchPhase::Document
            }
        }
    }

    /// Executes the stage against the context's record
    pub fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<StageOutcome, StageError> {
        match self {
            Self::MetadataFilter(chain) | Self::ContentFilter(chain) => {
                match chain.evaluate(ctx.record)? {
                    Decision::Accept => Ok(StageOutcome::proceed()),
                    Decision::Reject => {
                        tracing::debug!("{} rejected by {}", ctx.reference(), self.name());
                        Ok(StageOutcome::stop(DocState::Rejected))
                    }
                }
            }
            Self::Checksum(checksummer) => {
                let signature = checksummer.compute(ctx.record)?;
                let (class, prior) = classify(ctx.store, &ctx.record.reference, signature.as_deref())
                    .map_err(|source| StageError::Store {
                        reference: ctx.record.reference.clone(),
                        source,
                    })?;
                ctx.record.prior_checksum = prior;
                ctx.record.new_checksum = signature;

                Ok(match class {
                    ChangeClass::Unmodified => StageOutcome::stop(DocState::Unmodified),
                    other => StageOutcome::proceed_as(other.into()),
                })
            }
        }
    }
}
