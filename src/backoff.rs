//! # Fibonacci Backoff
//!
//! Fibonacci-based backoff for failed reconcile passes. The sequence grows
//! more slowly than exponential backoff, which suits an event-driven loop
//! where most failures clear after one or two retries.
//!
//! The sequence is calculated in whole seconds: 1s, 1s, 2s, 3s, 5s, 8s, ...
//! capped at 60s.
//!
//! ## Usage
//!
//! ```rust
//! use dummy_operator::backoff::FibonacciBackoff;
//!
//! let mut backoff = FibonacciBackoff::new(1, 60); // 1 second min, 60 seconds max
//! assert_eq!(backoff.next_backoff_seconds(), 1);
//! assert_eq!(backoff.next_backoff_seconds(), 1);
//! assert_eq!(backoff.next_backoff_seconds(), 2);
//! assert_eq!(backoff.next_backoff_seconds(), 3);
//! assert_eq!(backoff.next_backoff_seconds(), 5);
//! ```

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Generates backoff durations following the Fibonacci sequence, capped at a
/// maximum. Each backoff is the sum of the previous two.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum backoff value in seconds (for reset)
    min_seconds: u64,
    /// Previous backoff value in seconds
    prev_seconds: u64,
    /// Current backoff value in seconds
    current_seconds: u64,
    /// Maximum backoff value in seconds
    max_seconds: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with the given minimum and maximum in
    /// seconds.
    ///
    /// # Example
    ///
    /// ```
    /// use dummy_operator::backoff::FibonacciBackoff;
    ///
    /// let backoff = FibonacciBackoff::new(1, 60);
    /// ```
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Get the next backoff duration in seconds and advance the sequence.
    ///
    /// # Example
    ///
    /// ```
    /// use dummy_operator::backoff::FibonacciBackoff;
    ///
    /// let mut backoff = FibonacciBackoff::new(1, 60);
    /// assert_eq!(backoff.next_backoff_seconds(), 1);
    /// assert_eq!(backoff.next_backoff_seconds(), 1);
    /// assert_eq!(backoff.next_backoff_seconds(), 2);
    /// ```
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result_seconds = self.current_seconds;

        let next_seconds = self.prev_seconds + self.current_seconds;
        self.prev_seconds = self.current_seconds;
        self.current_seconds = std::cmp::min(next_seconds, self.max_seconds);

        result_seconds
    }

    /// Get the next backoff duration as a [`Duration`] and advance the
    /// sequence.
    ///
    /// # Example
    ///
    /// ```
    /// use dummy_operator::backoff::FibonacciBackoff;
    /// use std::time::Duration;
    ///
    /// let mut backoff = FibonacciBackoff::new(1, 60);
    /// assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
    /// ```
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Reset the backoff to the initial state after a success.
    ///
    /// # Example
    ///
    /// ```
    /// use dummy_operator::backoff::FibonacciBackoff;
    ///
    /// let mut backoff = FibonacciBackoff::new(1, 60);
    /// backoff.next_backoff_seconds();
    /// backoff.next_backoff_seconds();
    /// backoff.reset();
    /// assert_eq!(backoff.next_backoff_seconds(), 1);
    /// ```
    pub fn reset(&mut self) {
        self.prev_seconds = 0;
        self.current_seconds = self.min_seconds;
    }
}

impl Default for FibonacciBackoff {
    /// The sequence used for failed reconcile passes: 1s minimum, 60s cap.
    fn default() -> Self {
        Self::new(1, 60)
    }
}

/// Per-resource backoff bookkeeping kept by the worker pool.
#[derive(Debug)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::default(),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(1, 60);

        // Error sequence in seconds: 1, 1, 2, 3, 5, 8, 13, 21, 34, 55, 60 (max)
        assert_eq!(backoff.next_backoff_seconds(), 1);
        assert_eq!(backoff.next_backoff_seconds(), 1);
        assert_eq!(backoff.next_backoff_seconds(), 2);
        assert_eq!(backoff.next_backoff_seconds(), 3);
        assert_eq!(backoff.next_backoff_seconds(), 5);
        assert_eq!(backoff.next_backoff_seconds(), 8);
        assert_eq!(backoff.next_backoff_seconds(), 13);
        assert_eq!(backoff.next_backoff_seconds(), 21);
        assert_eq!(backoff.next_backoff_seconds(), 34);
        assert_eq!(backoff.next_backoff_seconds(), 55);
        assert_eq!(backoff.next_backoff_seconds(), 60);
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(1, 60);

        for _ in 0..10 {
            backoff.next_backoff_seconds();
        }
        // Next would be 89 (34+55), but must stay capped at 60.
        assert_eq!(backoff.next_backoff_seconds(), 60);
        assert_eq!(backoff.next_backoff_seconds(), 60);
        assert_eq!(backoff.next_backoff_seconds(), 60);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(1, 60);

        assert_eq!(backoff.next_backoff_seconds(), 1);
        assert_eq!(backoff.next_backoff_seconds(), 1);
        assert_eq!(backoff.next_backoff_seconds(), 2);
        assert_eq!(backoff.next_backoff_seconds(), 3);

        backoff.reset();

        // Restarts from the beginning after a success.
        assert_eq!(backoff.next_backoff_seconds(), 1);
        assert_eq!(backoff.next_backoff_seconds(), 1);
        assert_eq!(backoff.next_backoff_seconds(), 2);
    }

    #[test]
    fn test_fibonacci_backoff_as_duration() {
        let mut backoff = FibonacciBackoff::new(1, 60);

        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
    }

    #[test]
    fn test_independent_backoff_state_per_resource() {
        let mut backoff1 = FibonacciBackoff::default();
        let mut backoff2 = FibonacciBackoff::default();

        assert_eq!(backoff1.next_backoff_seconds(), 1);
        assert_eq!(backoff1.next_backoff_seconds(), 1);
        assert_eq!(backoff1.next_backoff_seconds(), 2);
        assert_eq!(backoff1.next_backoff_seconds(), 3);

        // The second sequence is untouched by the first.
        assert_eq!(backoff2.next_backoff_seconds(), 1);

        backoff1.reset();
        assert_eq!(backoff1.next_backoff_seconds(), 1);

        // And continues independently after the first was reset.
        assert_eq!(backoff2.next_backoff_seconds(), 1);
        assert_eq!(backoff2.next_backoff_seconds(), 2);
    }

    #[test]
    fn test_backoff_state_counts_errors() {
        let mut state = BackoffState::new();
        assert_eq!(state.error_count, 0);

        state.increment_error();
        state.increment_error();
        assert_eq!(state.error_count, 2);

        state.error_count = u32::MAX;
        state.increment_error();
        assert_eq!(state.error_count, u32::MAX);
    }
}
