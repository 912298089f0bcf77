//! Per-account pagination state for the privileged fetch path.

use serde::{Deserialize, Serialize};

/// Where privileged pagination of one account resumes
///
/// The public path resumes from the account's own `message_count`; the
/// privileged path counts items and may be handed an explicit cursor by the
/// remote, so it keeps its position here. The orchestrator owns one cursor
/// per account and lends it to each sync.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Offset of the next privileged page
    pub next_offset: u64,
    /// Items loaded through the privileged path since the last restart from 0
    pub loaded_count: u64,
}

impl SyncCursor {
    /// Start over from the newest page
    pub fn reset(&mut self) {
        self.next_offset = 0;
        self.loaded_count = 0;
    }

    /// Record a privileged page of `items` items fetched at `offset`
    ///
    /// Uses the remote's cursor when one was provided.
    pub fn advance(&mut self, offset: u64, items: usize, remote_next: Option<u64>) {
        let items = items as u64;
        self.next_offset = remote_next.unwrap_or(offset + items);
        self.loaded_count += items;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_prefers_remote_cursor() {
        let mut cursor = SyncCursor::default();

        cursor.advance(0, 10, None);
        assert_eq!(cursor.next_offset, 10);
        assert_eq!(cursor.loaded_count, 10);

        cursor.advance(10, 7, Some(21));
        assert_eq!(cursor.next_offset, 21);
        assert_eq!(cursor.loaded_count, 17);

        cursor.reset();
        assert_eq!(cursor, SyncCursor::default());
    }
}
