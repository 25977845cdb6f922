//! Bounded sample history with a trailing-window average.
//!
//! Every output is the plain mean of an explicit, finite set of recent
//! samples. A single outlier measurement still moves the average by
//! `1/window` of its deviation; there is no outlier weighting.

use std::collections::VecDeque;

use thiserror::Error;

/// Errors from reading or updating a [`SampleHistory`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HistoryError {
    #[error("history is empty")]
    Empty,

    #[error("sample must be finite (got {0})")]
    NonFinite(f64),
}

/// A FIFO-capped sequence of samples, oldest first.
#[derive(Debug, Clone)]
pub struct SampleHistory {
    entries: VecDeque<f64>,
    max_entries: usize,
    window: usize,
}

impl SampleHistory {
    /// Create an empty history. Both limits are clamped to at least one.
    pub fn new(max_entries: usize, window: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            entries: VecDeque::with_capacity(max_entries),
            max_entries,
            window: window.max(1),
        }
    }

    /// Append `sample`, evict the oldest entries beyond `max_entries`, and
    /// return the average of the last `window` entries.
    ///
    /// Non-finite samples are rejected and leave the history untouched.
    pub fn record(&mut self, sample: f64) -> Result<f64, HistoryError> {
        if !sample.is_finite() {
            return Err(HistoryError::NonFinite(sample));
        }

        self.entries.push_back(sample);
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }

        self.average_last(self.window)
    }

    /// Average of the last `min(n, len)` entries.
    pub fn average_last(&self, n: usize) -> Result<f64, HistoryError> {
        let take = n.min(self.entries.len());
        if take == 0 {
            return Err(HistoryError::Empty);
        }

        let sum: f64 = self.entries.iter().rev().take(take).sum();
        Ok(sum / take as f64)
    }

    /// Average over the configured window.
    pub fn average(&self) -> Result<f64, HistoryError> {
        self.average_last(self.window)
    }

    /// Retained samples, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
