//! Status - postbox の状態別件数

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostboxCounts {
    pub pending: usize,
    pub processed: usize,
    pub dead: usize,
}

impl PostboxCounts {
    pub fn total(&self) -> usize {
        self.pending + self.processed + self.dead
    }

    /// Nothing left to deliver.
    pub fn is_drained(&self) -> bool {
        self.pending == 0
    }
}
