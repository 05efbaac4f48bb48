use crate::checksum::ChecksumStore;
use crate::document::{DocumentRecord, FetchPhase};

/// Binding of one document to the pipeline for a single run
///
/// Stages may mutate the record but only read everything else.
pub struct PipelineContext<'a> {
    pub record: &'a mut DocumentRecord,
    pub phase: FetchPhase,
    pub store: &'a dyn ChecksumStore,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        record: &'a mut DocumentRecord,
        phase: FetchPhase,
        store: &'a dyn ChecksumStore,
    ) -> Self {
        Self {
            record,
            phase,
            store,
        }
    }

    pub fn reference(&self) -> &str {
        &self.record.reference
    }
}
