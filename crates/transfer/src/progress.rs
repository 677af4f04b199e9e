use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

/// Why an upload job ended without success.
///
/// Each kind maps to the negative code a progress consumer (e.g. a UI)
/// receives as the terminal value:
///
/// | code | kind |
/// |------|------|
/// | `-1` | [`FileInfo`](Self::FileInfo) |
/// | `-2` | [`Connection`](Self::Connection) |
/// | `-3` | [`Auth`](Self::Auth) |
/// | `-4` | [`Split`](Self::Split) |
/// | `-5` | [`Upload`](Self::Upload) |
///
/// `-5` extends the four classic codes: uploads retry a bounded number of
/// rounds, so consumers must also expect a job that gives up after the plan
/// was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFailure {
    /// The local file is missing, empty, or unusable.
    FileInfo,
    /// The server could not be reached.
    Connection,
    /// The server rejected the credentials.
    Auth,
    /// The server's split plan was missing or malformed.
    Split,
    /// Rounds were exhausted, assembly failed, or the session was lost.
    Upload,
}

impl UploadFailure {
    pub const fn code(self) -> i32 {
        match self {
            Self::FileInfo => -1,
            Self::Connection => -2,
            Self::Auth => -3,
            Self::Split => -4,
            Self::Upload => -5,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::FileInfo),
            -2 => Some(Self::Connection),
            -3 => Some(Self::Auth),
            -4 => Some(Self::Split),
            -5 => Some(Self::Upload),
            _ => None,
        }
    }
}

/// One value on a job's progress stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Percent complete, 0..=100. `100` is only sent once the server confirmed.
    Percent(u8),
    /// Terminal failure.
    Failed(UploadFailure),
}

impl Progress {
    /// Integer form: `0..=100`, or a negative failure code.
    pub fn code(self) -> i32 {
        match self {
            Self::Percent(p) => i32::from(p),
            Self::Failed(kind) => kind.code(),
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0..=100 => Some(Self::Percent(code as u8)),
            _ => UploadFailure::from_code(code).map(Self::Failed),
        }
    }

    /// Whether this value ends the stream.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Percent(100) | Self::Failed(_))
    }
}

/// `floor(done * 100 / total)`, clamped to 100. A zero total reads as 0.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let p = u128::from(done) * 100 / u128::from(total);
    p.min(100) as u8
}

/// Aggregates per-segment byte counts into a monotonic percentage stream.
///
/// Every segment reports its absolute position (resume offset plus bytes
/// sent in the current attempt), so a retried round never counts the same
/// bytes twice. Values stop at 99 and only strictly increasing values are
/// emitted; the terminal value is left to the job owner.
pub struct ProgressMeter {
    total: u64,
    segments: Vec<AtomicU64>,
    last: Mutex<Option<u8>>,
    tx: mpsc::Sender<Progress>,
}

impl ProgressMeter {
    pub fn new(total: u64, segment_count: usize, tx: mpsc::Sender<Progress>) -> Self {
        Self {
            total,
            segments: (0..segment_count).map(|_| AtomicU64::new(0)).collect(),
            last: Mutex::new(None),
            tx,
        }
    }

    /// Records that segment `index` now holds `position` bytes.
    pub fn record(&self, index: usize, position: u64) {
        let Some(slot) = self.segments.get(index) else {
            return;
        };
        slot.store(position, Ordering::Relaxed);
        self.emit();
    }

    /// Bytes accounted for across all segments.
    pub fn transferred(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| s.load(Ordering::Relaxed))
            .sum::<u64>()
            .min(self.total)
    }

    fn emit(&self) {
        let p = percent(self.transferred(), self.total).min(99);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.is_some_and(|l| l >= p) {
            return;
        }
        *last = Some(p);
        // Intermediate values may be dropped when the consumer lags.
        let _ = self.tx.try_send(Progress::Percent(p));
    }
}
