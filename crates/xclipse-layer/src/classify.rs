//! Advisory workload classification for queue submissions.
//!
//! The layer cannot see inside command buffers, so the only signal is the shape of each
//! `VkSubmitInfo`:
//!
//! - more than two command buffers: compute-like (dispatch chains are usually recorded in many
//!   small buffers)
//! - exactly one command buffer: transfer-like (uploads and copies tend to be a single buffer)
//! - anything else, including empty submits: graphics-like
//!
//! The result is a pure function of the command-buffer counts. Nothing in the layer depends on it
//! being right: it only feeds statistics and the optional [`SubmitReorder`] hook.

use std::fmt;

use crate::request::SubmitBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Compute,
    Transfer,
    Graphics,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkloadKind::Compute => "compute",
            WorkloadKind::Transfer => "transfer",
            WorkloadKind::Graphics => "graphics",
        };
        f.write_str(s)
    }
}

pub fn classify_submit(submit: &SubmitBatch) -> WorkloadKind {
    classify_command_buffer_count(submit.command_buffer_count())
}

pub fn classify_command_buffer_count(count: usize) -> WorkloadKind {
    match count {
        0 | 2 => WorkloadKind::Graphics,
        1 => WorkloadKind::Transfer,
        _ => WorkloadKind::Compute,
    }
}

/// Indices into the submitted batch, grouped by workload kind. Each group keeps submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionPartition {
    pub compute: Vec<usize>,
    pub transfer: Vec<usize>,
    pub graphics: Vec<usize>,
}

impl SubmissionPartition {
    pub fn group(&self, kind: WorkloadKind) -> &[usize] {
        match kind {
            WorkloadKind::Compute => &self.compute,
            WorkloadKind::Transfer => &self.transfer,
            WorkloadKind::Graphics => &self.graphics,
        }
    }

    pub fn len(&self) -> usize {
        self.compute.len() + self.transfer.len() + self.graphics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn partition_submits(submits: &[SubmitBatch]) -> SubmissionPartition {
    let mut partition = SubmissionPartition::default();
    for (index, submit) in submits.iter().enumerate() {
        match classify_submit(submit) {
            WorkloadKind::Compute => partition.compute.push(index),
            WorkloadKind::Transfer => partition.transfer.push(index),
            WorkloadKind::Graphics => partition.graphics.push(index),
        }
    }
    partition
}

/// Extension point for reordering a submission batch.
///
/// Returning `Some(order)` asks the layer to forward `submits[order[0]], submits[order[1]], ...`.
/// The layer ignores anything that is not a permutation of `0..submits.len()`. Reordering is only
/// sound when the batch carries no ordering dependencies the policy cannot see, so the default
/// keeps the application's order.
pub trait SubmitReorder: Send + Sync {
    fn reorder(
        &self,
        submits: &[SubmitBatch],
        partition: &SubmissionPartition,
    ) -> Option<Vec<usize>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PreserveOrder;

impl SubmitReorder for PreserveOrder {
    fn reorder(
        &self,
        _submits: &[SubmitBatch],
        _partition: &SubmissionPartition,
    ) -> Option<Vec<usize>> {
        None
    }
}

/// Whether `order` visits every index in `0..len` exactly once.
pub fn is_permutation(order: &[usize], len: usize) -> bool {
    if order.len() != len {
        return false;
    }
    let mut seen = vec![false; len];
    for &index in order {
        match seen.get_mut(index) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;
    use ash::vk::Handle;
    use pretty_assertions::assert_eq;

    fn submit_with(count: usize) -> SubmitBatch {
        SubmitBatch::with_command_buffers(
            (0..count as u64)
                .map(|raw| vk::CommandBuffer::from_raw(raw + 1))
                .collect(),
        )
    }

    #[test]
    fn command_buffer_count_drives_the_kind() {
        assert_eq!(classify_submit(&submit_with(0)), WorkloadKind::Graphics);
        assert_eq!(classify_submit(&submit_with(1)), WorkloadKind::Transfer);
        assert_eq!(classify_submit(&submit_with(2)), WorkloadKind::Graphics);
        assert_eq!(classify_submit(&submit_with(3)), WorkloadKind::Compute);
        assert_eq!(classify_submit(&submit_with(16)), WorkloadKind::Compute);
    }

    #[test]
    fn partition_keeps_submission_order_within_groups() {
        let submits: Vec<_> = [1, 3, 2, 1, 5, 0].into_iter().map(submit_with).collect();
        let partition = partition_submits(&submits);
        assert_eq!(
            partition,
            SubmissionPartition {
                compute: vec![1, 4],
                transfer: vec![0, 3],
                graphics: vec![2, 5],
            }
        );
        assert_eq!(partition.len(), submits.len());
    }

    #[test]
    fn permutation_check() {
        assert!(is_permutation(&[], 0));
        assert!(is_permutation(&[2, 0, 1], 3));
        assert!(!is_permutation(&[0, 0, 1], 3));
        assert!(!is_permutation(&[0, 1], 3));
        assert!(!is_permutation(&[0, 1, 3], 3));
    }

    #[test]
    fn default_policy_keeps_order() {
        let submits = vec![submit_with(1), submit_with(4)];
        let partition = partition_submits(&submits);
        assert_eq!(PreserveOrder.reorder(&submits, &partition), None);
    }
}
