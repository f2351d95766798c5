//! Candidate document sources.

use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use suppression_common::{MatchedDocument, TimeRange};

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: Value,
    pub time_range: TimeRange,
    /// Field bounding the search; the rule's timestamp override or `@timestamp`.
    pub timestamp_field: String,
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Documents matching the rule query within the time range, in a stable order.
    async fn search(&self, request: &SearchRequest) -> Result<Vec<MatchedDocument>>;
}

/// Source over documents already matched upstream and carried in the cycle request.
///
/// The query is assumed to have been applied; only the time range is enforced.
#[derive(Debug, Clone, Default)]
pub struct InlineDocumentSource {
    documents: Vec<MatchedDocument>,
}

impl InlineDocumentSource {
    pub fn new(documents: Vec<MatchedDocument>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl DocumentSource for InlineDocumentSource {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<MatchedDocument>> {
        Ok(self
            .documents
            .iter()
            .filter(|doc| {
                let ts = doc.suppression_timestamp(Some(&request.timestamp_field));
                request.time_range.contains(ts)
            })
            .cloned()
            .collect())
    }
}
