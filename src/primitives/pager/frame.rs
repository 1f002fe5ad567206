use std::sync::Arc;

use crate::types::PageId;

/// One slot of the page cache.
///
/// Readers receive clones of `data`, so a frame can be reclaimed while an
/// earlier reader still holds the old page image.
pub struct Frame {
    /// Page held by the frame, if any.
    pub id: Option<PageId>,
    pub data: Option<Arc<[u8]>>,
    /// Clock reference bit; cleared as the hand passes.
    pub reference: bool,
}

impl Frame {
    pub fn empty() -> Self {
        Self {
            id: None,
            data: None,
            reference: false,
        }
    }

    /// Loads `data` as page `id` and marks the frame referenced.
    pub fn install(&mut self, id: PageId, data: Arc<[u8]>) {
        self.id = Some(id);
        self.data = Some(data);
        self.reference = true;
    }

    /// Empties the frame, returning the page it held.
    pub fn clear(&mut self) -> Option<PageId> {
        self.data = None;
        self.reference = false;
        self.id.take()
    }
}
