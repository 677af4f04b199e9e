use std::ops::Range;

use crate::TransferError;

/// Most segments a single upload may be split into.
///
/// Both peers allocate per-segment state from a plan, so a plan over this
/// limit is refused rather than trusted.
pub const MAX_SEGMENTS: u64 = 65_536;

/// How a file of `total_size` bytes is cut into fixed-size segments.
///
/// Segment `i` covers `[i * segment_size, min((i + 1) * segment_size, total_size))`;
/// only the last segment may be shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPlan {
    total_size: u64,
    segment_size: u64,
}

impl SplitPlan {
    /// Both sizes must be non-zero and the split must need at most
    /// [`MAX_SEGMENTS`] segments.
    pub fn new(total_size: u64, segment_size: u64) -> Result<Self, TransferError> {
        if total_size == 0 {
            return Err(TransferError::InvalidPlan("total size is zero".into()));
        }
        if segment_size == 0 {
            return Err(TransferError::InvalidPlan("segment size is zero".into()));
        }
        let count = total_size.div_ceil(segment_size);
        if count > MAX_SEGMENTS {
            return Err(TransferError::InvalidPlan(format!(
                "{total_size} bytes at {segment_size} per segment needs {count} segments (max {MAX_SEGMENTS})"
            )));
        }
        Ok(Self {
            total_size,
            segment_size,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    /// `ceil(total_size / segment_size)`.
    pub fn segment_count(&self) -> u64 {
        self.total_size.div_ceil(self.segment_size)
    }

    /// Byte offset of segment `index` within the file.
    pub fn segment_offset(&self, index: u64) -> Option<u64> {
        (index < self.segment_count()).then(|| index * self.segment_size)
    }

    /// Bytes segment `index` holds when complete.
    pub fn expected_size(&self, index: u64) -> Option<u64> {
        let count = self.segment_count();
        if index >= count {
            return None;
        }
        if index == count - 1 {
            Some(self.total_size - self.segment_size * index)
        } else {
            Some(self.segment_size)
        }
    }

    /// Byte range of segment `index` within the file.
    pub fn segment_range(&self, index: u64) -> Option<Range<u64>> {
        let start = self.segment_offset(index)?;
        let len = self.expected_size(index)?;
        Some(start..start + len)
    }
}
