//! Container-identity tracking for cycle detection during encode.

use crate::error::{CborError, CborResult};

/// A set of container identities live on the current encode path.
///
/// Identities are raw addresses; an entry is added when the encoder enters
/// a container and removed when it leaves, so the set only ever holds the
/// current recursion path and need not survive the top-level call. Entering
/// an identity that is already present means the value graph has a cycle.
#[derive(Debug, Default)]
pub struct LoopDetector {
    live: Vec<usize>,
}

impl LoopDetector {
    /// Create an empty detector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of containers on the current path.
    pub fn depth(&self) -> usize {
        self.live.len()
    }

    /// Drop all tracked identities.
    ///
    /// Useful when a shared detector is reused after a failed encode left
    /// entries behind.
    pub fn reset(&mut self) {
        self.live.clear();
    }

    pub(crate) fn enter(&mut self, id: usize) -> CborResult<()> {
        if self.live.contains(&id) {
            return Err(CborError::LoopDetected);
        }
        self.live.push(id);
        Ok(())
    }

    pub(crate) fn exit(&mut self, id: usize) {
        if let Some(i) = self.live.iter().rposition(|&x| x == id) {
            self.live.remove(i);
        }
    }
}
