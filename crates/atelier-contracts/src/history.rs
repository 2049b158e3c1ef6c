use serde::{Deserialize, Serialize};

/// Most-recent-first history keeps at most this many artifacts.
pub const HISTORY_CAPACITY: usize = 8;

/// A generated or edited image held in session history. `data` is the raw
/// artifact as base64 text; `resolution` is derived by decoding the bytes
/// after receipt, never taken from the remote response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    pub data: String,
    pub resolution: String,
    pub source_prompt: Option<String>,
}

/// Bounded, most-recent-first artifact history. Eviction is oldest-first
/// once the bound is exceeded.
#[derive(Debug, Clone, Default)]
pub struct ArtifactHistory {
    items: Vec<ImageArtifact>,
}

impl ArtifactHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepends a finished batch in order (first element of the batch ends
    /// up newest) and trims to capacity in the same step, so observers
    /// never see an over-full history.
    pub fn prepend_batch(&mut self, batch: Vec<ImageArtifact>) {
        let mut items = batch;
        items.append(&mut self.items);
        items.truncate(HISTORY_CAPACITY);
        self.items = items;
    }

    pub fn items(&self) -> &[ImageArtifact] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn remove(&mut self, index: usize) -> Option<ImageArtifact> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }
}
