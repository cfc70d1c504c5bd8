use crate::error::Result;
use crate::model::Coverage;

use super::{Reporter, SourceReader};

/// Re-serializes the persisted schema, pretty-printed; sources are unused.
pub struct JsonReporter;

impl Reporter for JsonReporter {
    fn render(&self, coverage: &Coverage, _sources: &dyn SourceReader) -> Result<String> {
        Ok(serde_json::to_string_pretty(coverage)?)
    }
}
