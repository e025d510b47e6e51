//! Part sizing for multipart uploads.
//!
//! The sizer accumulates compressed segments and cuts them into parts that
//! respect the remote limits: every part except the last is at least
//! `min_part_size` bytes, and no more than `max_parts` parts are produced.

use bytes::{Bytes, BytesMut};
use snafu::prelude::*;

use super::{CompressedSegment, Part};
use crate::config::MB;
use crate::error::{ExportError, PartLimitExceededSnafu};

/// Smallest non-final part the remote service accepts.
pub const MIN_PART_SIZE: usize = 5 * MB;

/// Largest number of parts in one multipart upload.
pub const MAX_PARTS: u32 = 10_000;

/// Default part threshold.
pub const DEFAULT_PART_SIZE: usize = 50 * MB;

/// Size and count limits applied by the [`PartSizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPolicy {
    /// Buffered bytes at which a part is cut.
    pub part_size: usize,
    /// Minimum size of any non-final part.
    pub min_part_size: usize,
    /// Maximum number of parts.
    pub max_parts: u32,
}

impl Default for PartPolicy {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            min_part_size: MIN_PART_SIZE,
            max_parts: MAX_PARTS,
        }
    }
}

impl PartPolicy {
    /// Effective cut threshold. Never below the minimum part size.
    pub fn threshold(&self) -> usize {
        self.part_size.max(self.min_part_size)
    }
}

/// Turns compressed segments into numbered parts.
///
/// A cut part is held back until the next segment arrives. If that segment
/// is the terminal one and smaller than `min_part_size`, it is appended to
/// the held part instead of being sent as an undersized part of its own.
/// Bytes below the threshold are likewise carried into the next part, so an
/// undersized run is only ever sent as the final part.
#[derive(Debug)]
pub struct PartSizer {
    policy: PartPolicy,
    buffer: BytesMut,
    held: Option<Part>,
    parts_emitted: u32,
}

impl PartSizer {
    pub fn new(policy: PartPolicy) -> Self {
        Self {
            policy,
            buffer: BytesMut::new(),
            held: None,
            parts_emitted: 0,
        }
    }

    /// Add a segment, returning the parts that are ready to upload.
    ///
    /// A non-terminal segment releases at most one part. The terminal segment
    /// releases whatever is left, which is nothing when no part was ever cut
    /// and the whole output is still below the threshold. In that case the
    /// caller collects the output with [`PartSizer::take_unpartitioned`].
    pub fn push(&mut self, segment: CompressedSegment) -> Result<Vec<Part>, ExportError> {
        if segment.is_last {
            return self.finish(segment);
        }

        self.buffer.extend_from_slice(&segment.bytes);
        let mut ready = Vec::new();
        if let Some(part) = self.held.take() {
            ready.push(part);
        }
        if self.buffer.len() >= self.policy.threshold() {
            self.held = Some(self.cut(false)?);
        }
        Ok(ready)
    }

    fn finish(&mut self, segment: CompressedSegment) -> Result<Vec<Part>, ExportError> {
        self.buffer.extend_from_slice(&segment.bytes);

        match self.held.take() {
            Some(mut held) if self.buffer.len() < self.policy.min_part_size => {
                let mut payload = BytesMut::from(held.payload.as_ref());
                payload.extend_from_slice(&self.buffer.split());
                held.payload = payload.freeze();
                held.is_last = true;
                Ok(vec![held])
            }
            Some(held) => Ok(vec![held, self.cut(true)?]),
            None if self.buffer.is_empty() => Ok(Vec::new()),
            None if self.parts_emitted == 0 && self.buffer.len() < self.policy.threshold() => {
                Ok(Vec::new())
            }
            None => Ok(vec![self.cut(true)?]),
        }
    }

    fn cut(&mut self, is_last: bool) -> Result<Part, ExportError> {
        ensure!(
            self.parts_emitted < self.policy.max_parts,
            PartLimitExceededSnafu {
                max_parts: self.policy.max_parts
            }
        );

        self.parts_emitted += 1;
        let payload = self.buffer.split().freeze();
        if !is_last {
            self.buffer.reserve(self.policy.threshold());
        }

        Ok(Part {
            part_number: self.parts_emitted,
            payload,
            is_last,
        })
    }

    /// Take the held bytes when the output never reached a full part.
    pub fn take_unpartitioned(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Number of parts cut so far.
    pub fn parts_emitted(&self) -> u32 {
        self.parts_emitted
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(len: usize, is_last: bool) -> CompressedSegment {
        CompressedSegment {
            bytes: Bytes::from(vec![b'x'; len]),
            is_last,
        }
    }

    fn policy(part_size: usize) -> PartPolicy {
        PartPolicy {
            part_size,
            min_part_size: MIN_PART_SIZE,
            max_parts: MAX_PARTS,
        }
    }

    fn run(sizer: &mut PartSizer, segments: Vec<CompressedSegment>) -> Vec<Part> {
        segments
            .into_iter()
            .flat_map(|s| sizer.push(s).unwrap())
            .collect()
    }

    fn sizes(parts: &[Part]) -> Vec<usize> {
        parts.iter().map(|p| p.len()).collect()
    }

    #[test]
    fn test_twelve_mib_with_five_mib_threshold() {
        let mut sizer = PartSizer::new(policy(5 * MB));
        let mut segments: Vec<_> = (0..11).map(|_| segment(MB, false)).collect();
        segments.push(segment(MB, true));

        let parts = run(&mut sizer, segments);
        assert_eq!(sizes(&parts), vec![5 * MB, 5 * MB, 2 * MB]);
        let numbers: Vec<_> = parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(parts[2].is_last);
        assert!(!parts[0].is_last && !parts[1].is_last);
    }

    #[test]
    fn test_small_tail_merges_into_held_part() {
        let mut sizer = PartSizer::new(policy(5 * MB));

        assert!(sizer.push(segment(5 * MB, false)).unwrap().is_empty());
        let parts = sizer.push(segment(MB, true)).unwrap();

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].part_number, 1);
        assert_eq!(parts[0].len(), 6 * MB);
        assert!(parts[0].is_last);
        assert_eq!(sizer.parts_emitted(), 1);
    }

    #[test]
    fn test_large_tail_follows_held_part() {
        let mut sizer = PartSizer::new(policy(5 * MB));
        let parts = run(&mut sizer, vec![segment(5 * MB, false), segment(5 * MB, true)]);

        assert_eq!(sizes(&parts), vec![5 * MB, 5 * MB]);
        assert!(!parts[0].is_last);
        assert!(parts[1].is_last);
        assert_eq!(parts[1].part_number, 2);
    }

    #[test]
    fn test_trailing_remainder_merges_into_final_part() {
        let mut sizer = PartSizer::new(policy(8 * MB));
        let parts = run(
            &mut sizer,
            vec![
                segment(8 * MB, false),
                segment(5 * MB, false),
                segment(MB, true),
            ],
        );

        assert_eq!(sizes(&parts), vec![8 * MB, 6 * MB]);
        assert!(parts[1].is_last);
    }

    #[test]
    fn test_small_output_is_not_partitioned() {
        let mut sizer = PartSizer::new(policy(5 * MB));
        let parts = run(&mut sizer, vec![segment(100, false), segment(20, true)]);

        assert!(parts.is_empty());
        assert_eq!(sizer.parts_emitted(), 0);
        assert_eq!(sizer.take_unpartitioned().len(), 120);
    }

    #[test]
    fn test_final_flush_crossing_threshold_emits_single_part() {
        let mut sizer = PartSizer::new(policy(5 * MB));
        let parts = run(&mut sizer, vec![segment(4 * MB, false), segment(2 * MB, true)]);

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].part_number, 1);
        assert_eq!(parts[0].len(), 6 * MB);
        assert!(parts[0].is_last);
    }

    #[test]
    fn test_empty_terminal_segment_marks_held_part_last() {
        let mut sizer = PartSizer::new(policy(5 * MB));
        let parts = run(&mut sizer, vec![segment(5 * MB, false), segment(0, true)]);

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].len(), 5 * MB);
        assert!(parts[0].is_last);
        assert_eq!(sizer.pending_len(), 0);
    }

    #[test]
    fn test_threshold_never_below_minimum() {
        let mut sizer = PartSizer::new(policy(MB));
        assert_eq!(policy(MB).threshold(), MIN_PART_SIZE);

        let parts = run(&mut sizer, vec![segment(2 * MB, false), segment(2 * MB, false)]);
        assert!(parts.is_empty());
        assert_eq!(sizer.pending_len(), 4 * MB);
    }

    #[test]
    fn test_part_limit_exceeded() {
        let mut sizer = PartSizer::new(PartPolicy {
            part_size: 10,
            min_part_size: 10,
            max_parts: 2,
        });

        assert!(sizer.push(segment(10, false)).unwrap().is_empty());
        assert_eq!(sizer.push(segment(10, false)).unwrap().len(), 1);
        let err = sizer.push(segment(10, false)).unwrap_err();
        assert!(matches!(err, ExportError::PartLimitExceeded { max_parts: 2 }));
    }

    #[test]
    fn test_non_final_parts_respect_minimum() {
        let mut sizer = PartSizer::new(PartPolicy {
            part_size: 100,
            min_part_size: 100,
            max_parts: MAX_PARTS,
        });
        let mut segments: Vec<_> = [30, 90, 10, 60, 200, 5, 99]
            .into_iter()
            .map(|len| segment(len, false))
            .collect();
        segments.push(segment(7, true));

        let parts = run(&mut sizer, segments);
        let total: usize = parts.iter().map(|p| p.len()).sum();
        assert_eq!(total, 501);
        for part in &parts[..parts.len() - 1] {
            assert!(part.len() >= 100);
        }
        assert!(parts.last().unwrap().is_last);
        for (i, part) in parts.iter().enumerate() {
            assert_eq!(part.part_number as usize, i + 1);
        }
    }
}
