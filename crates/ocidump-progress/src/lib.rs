//! Discovery progress tracking with TTY detection.
//!
//! The tracker counts completed (compartment x resource-type) probes on a
//! lock-free atomic path and derives an ETA from a moving window of the most
//! recent completion samples. Rendering goes to standard error through an
//! indicatif bar throttled to two redraws per second; when progress is
//! disabled every operation is a no-op that allocates nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use atty::Stream;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Number of completion samples in the ETA moving average.
pub const ETA_WINDOW: usize = 20;

/// Maximum redraw rate; two per second keeps at least 500ms between frames.
const RENDER_HZ: u8 = 2;

/// Detects whether stderr is connected to a TTY.
pub fn is_tty() -> bool {
    atty::is(Stream::Stderr)
}

struct Inner {
    total: AtomicU64,
    done: AtomicU64,
    started: Instant,
    /// Elapsed micros at each completion, ring-indexed by completion count.
    samples: [AtomicU64; ETA_WINDOW],
    bar: Option<ProgressBar>,
}

/// Thread-safe progress tracker for the discovery fan-out.
///
/// Cloning is cheap; all clones share the same counters.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Option<Arc<Inner>>,
}

impl ProgressTracker {
    /// A tracker that renders to stderr when it is a TTY.
    pub fn new(enabled: bool) -> Self {
        if !enabled {
            return Self::disabled();
        }

        let bar = if is_tty() {
            let pb = ProgressBar::with_draw_target(
                Some(0),
                ProgressDrawTarget::stderr_with_hz(RENDER_HZ),
            );
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            Some(pb)
        } else {
            None
        };

        Self {
            inner: Some(Arc::new(Inner {
                total: AtomicU64::new(0),
                done: AtomicU64::new(0),
                started: Instant::now(),
                samples: std::array::from_fn(|_| AtomicU64::new(0)),
                bar,
            })),
        }
    }

    /// A tracker where every operation is a no-op.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Set the expected number of (compartment x resource-type) completions.
    pub fn set_total(&self, total: u64) {
        let Some(inner) = &self.inner else { return };
        inner.total.store(total, Ordering::Relaxed);
        if let Some(bar) = &inner.bar {
            bar.set_length(total);
        }
    }

    /// Record one completed probe and refresh the render line.
    pub fn tick(&self, compartment: &str, kind: &str) {
        let Some(inner) = &self.inner else { return };

        let n = inner.done.fetch_add(1, Ordering::Relaxed) + 1;
        let elapsed = inner.started.elapsed().as_micros() as u64;
        inner.samples[((n - 1) as usize) % ETA_WINDOW].store(elapsed, Ordering::Relaxed);

        if let Some(bar) = &inner.bar {
            bar.set_position(n);
            let eta = match self.eta() {
                Some(eta) => format!("eta {}s", eta.as_secs()),
                None => "eta --".to_string(),
            };
            bar.set_message(format!("{compartment}/{kind} ({eta})"));
        }
    }

    pub fn done(&self) -> u64 {
        self.inner
            .as_ref()
            .map(|i| i.done.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.inner
            .as_ref()
            .map(|i| i.total.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// ETA from the average pace of the last [`ETA_WINDOW`] completions.
    /// `None` until two samples exist or once everything is done.
    pub fn eta(&self) -> Option<Duration> {
        let inner = self.inner.as_ref()?;

        let done = inner.done.load(Ordering::Relaxed);
        let total = inner.total.load(Ordering::Relaxed);
        if done < 2 || total <= done {
            return None;
        }

        let window = (done as usize).min(ETA_WINDOW);
        let latest = inner.samples[(done as usize - 1) % ETA_WINDOW].load(Ordering::Relaxed);
        let earliest_slot = if (done as usize) > ETA_WINDOW {
            (done as usize) % ETA_WINDOW
        } else {
            0
        };
        let earliest = inner.samples[earliest_slot].load(Ordering::Relaxed);

        let span = latest.saturating_sub(earliest);
        let pace = span / (window as u64 - 1);
        Some(Duration::from_micros(pace * (total - done)))
    }

    /// Clear the render line. Counters remain readable.
    pub fn finish(&self) {
        let Some(inner) = &self.inner else { return };
        if let Some(bar) = &inner.bar {
            bar.finish_and_clear();
        }
    }
}
