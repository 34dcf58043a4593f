//! Per-agent activity trackers
//!
//! Rolling rings of output and error timestamps, last-seen markers, and ping
//! bookkeeping. Everything here is in-memory and rebuilt from scratch when
//! the process restarts.

use chrono::{DateTime, Duration, Utc};

/// Upper bound on ring size so a chatty agent cannot grow memory unbounded
const RING_CAPACITY: usize = 256;

/// Activity record for one agent
#[derive(Debug, Clone)]
pub struct AgentTracker {
    pub last_output_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    /// Recent output timestamps, oldest first
    outputs: Vec<DateTime<Utc>>,
    /// Recent error timestamps, oldest first
    errors: Vec<DateTime<Utc>>,
    pub last_ping_at: Option<DateTime<Utc>>,
    pub ping_attempts: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Set by an explicit crash report; cleared once acted on
    pub crashed: bool,
}

impl AgentTracker {
    pub fn new() -> Self {
        Self {
            last_output_at: None,
            last_error_at: None,
            outputs: Vec::new(),
            errors: Vec::new(),
            last_ping_at: None,
            ping_attempts: 0,
            last_checked_at: None,
            crashed: false,
        }
    }

    /// Seed the output clock, used when an agent is first observed so a
    /// fresh session is not immediately "silent since forever".
    pub fn observed(now: DateTime<Utc>) -> Self {
        let mut t = Self::new();
        t.last_output_at = Some(now);
        t
    }

    pub fn record_output(&mut self, at: DateTime<Utc>) {
        self.last_output_at = Some(at);
        push_ring(&mut self.outputs, at);
    }

    pub fn record_error(&mut self, at: DateTime<Utc>) {
        self.last_error_at = Some(at);
        push_ring(&mut self.errors, at);
    }

    pub fn record_ping(&mut self, at: DateTime<Utc>) {
        self.last_ping_at = Some(at);
        self.ping_attempts += 1;
    }

    /// A restart wipes ping state and the error ring
    pub fn reset_after_restart(&mut self) {
        self.ping_attempts = 0;
        self.last_ping_at = None;
        self.errors.clear();
        self.last_error_at = None;
        self.crashed = false;
    }

    /// Errors inside the rolling window ending at `now`
    pub fn errors_in_window(&self, now: DateTime<Utc>, window: Duration) -> usize {
        count_in_window(&self.errors, now, window)
    }

    /// Outputs inside the rolling window ending at `now`
    pub fn outputs_in_window(&self, now: DateTime<Utc>, window: Duration) -> usize {
        count_in_window(&self.outputs, now, window)
    }

    /// Fraction of window activity that is errors; `None` when either side
    /// of the ratio is missing
    pub fn error_rate(&self, now: DateTime<Utc>, window: Duration) -> Option<f64> {
        let errors = self.errors_in_window(now, window);
        let outputs = self.outputs_in_window(now, window);
        if errors == 0 || outputs == 0 {
            return None;
        }
        Some(errors as f64 / (errors + outputs) as f64)
    }

    /// How long the agent has been silent
    pub fn silence(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_output_at.map(|t| now - t)
    }
}

impl Default for AgentTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn push_ring(ring: &mut Vec<DateTime<Utc>>, at: DateTime<Utc>) {
    ring.push(at);
    if ring.len() > RING_CAPACITY {
        let excess = ring.len() - RING_CAPACITY;
        ring.drain(..excess);
    }
}

fn count_in_window(ring: &[DateTime<Utc>], now: DateTime<Utc>, window: Duration) -> usize {
    let cutoff = now - window;
    ring.iter().filter(|&&t| t > cutoff).count()
}
