//! Multipart upload sessions and their parts.

use serde::{Deserialize, Serialize};

/// Lifecycle of a multipart upload.
///
/// `Uninitialized → SessionOpen → Uploading → Committing → Complete`, with
/// `Aborted` reachable from every non-terminal state.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadState {
    Uninitialized,
    SessionOpen,
    Uploading,
    Committing,
    Complete,
    Aborted,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Complete | UploadState::Aborted)
    }
}

/// Progress of a single part.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartState {
    Pending,
    InFlight,
    Acked,
    Failed,
}

/// One fixed-size slice of the logical object.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadPart {
    /// Zero-based position in the session.
    pub index: usize,

    /// One-based part number sent to the backend.
    pub part_number: i32,

    /// Exact byte length of this part.
    pub length: u64,

    /// Integrity token returned by the backend once acknowledged.
    pub etag: Option<String>,

    pub state: PartState,
}

/// A part acknowledgment handed to the commit step.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// A multipart upload session.
///
/// `part_count = ceil(total_length / batch_size)`; every part but the last
/// is exactly `batch_size` long.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadSession {
    /// Backend handle, present once the session is open.
    pub upload_id: Option<String>,
    pub total_length: u64,
    pub batch_size: u64,
    pub part_count: usize,
    pub parts: Vec<UploadPart>,
    pub state: UploadState,
}

impl UploadSession {
    /// Lay out the parts for `total_length` bytes split in `batch_size` chunks.
    pub fn plan(total_length: u64, batch_size: u64) -> Self {
        let batch_size = batch_size.max(1);
        let part_count = total_length.div_ceil(batch_size) as usize;
        let parts = (0..part_count)
            .map(|index| {
                let offset = index as u64 * batch_size;
                UploadPart {
                    index,
                    part_number: index as i32 + 1,
                    length: batch_size.min(total_length - offset),
                    etag: None,
                    state: PartState::Pending,
                }
            })
            .collect();

        Self {
            upload_id: None,
            total_length,
            batch_size,
            part_count,
            parts,
            state: UploadState::Uninitialized,
        }
    }

    pub fn acked_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| p.state == PartState::Acked)
            .count()
    }

    pub fn is_fully_acked(&self) -> bool {
        self.acked_count() == self.part_count
    }

    /// Acknowledgments in part-number order, ready for commit.
    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        self.parts
            .iter()
            .filter_map(|p| {
                p.etag.as_ref().map(|etag| CompletedPart {
                    part_number: p.part_number,
                    etag: etag.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_with_short_final_part() {
        let session = UploadSession::plan(10, 4);
        assert_eq!(session.part_count, 3);
        let lengths: Vec<u64> = session.parts.iter().map(|p| p.length).collect();
        assert_eq!(lengths, vec![4, 4, 2]);
        let numbers: Vec<i32> = session.parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn plan_with_aligned_length() {
        let session = UploadSession::plan(8, 4);
        assert_eq!(session.part_count, 2);
        assert!(session.parts.iter().all(|p| p.length == 4));
        assert_eq!(session.state, UploadState::Uninitialized);
    }
}
