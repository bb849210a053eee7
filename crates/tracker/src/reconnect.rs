//! Bounded backoff for reopening a push channel while polling.
//!
//! After a push failure the tracker polls and, every so many poll ticks,
//! tries the push channel again. The gap between attempts grows
//! geometrically and the total number of attempts is capped, so a job
//! whose socket endpoint is permanently broken settles on polling instead
//! of reconnecting forever.

/// Tunable parameters for push reopen attempts, measured in poll ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Poll ticks before the first reopen attempt.
    pub initial_gap_ticks: u32,
    /// Upper bound on the gap between attempts.
    pub max_gap_ticks: u32,
    /// Factor by which the gap grows after each failed attempt.
    pub multiplier: f64,
    /// Reopen attempts allowed over the tracker's lifetime.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_gap_ticks: 5,
            max_gap_ticks: 60,
            multiplier: 2.0,
            max_attempts: 8,
        }
    }
}

/// Calculate the next gap from the current gap and config.
///
/// The result is clamped to `[1, max_gap_ticks]`.
pub fn next_gap(current: u32, config: &ReconnectConfig) -> u32 {
    let next = (f64::from(current) * config.multiplier).round();
    let next = if next.is_finite() && next >= 1.0 {
        next.min(f64::from(u32::MAX)) as u32
    } else {
        1
    };
    next.min(config.max_gap_ticks).max(1)
}

/// Countdown to the next reopen attempt.
#[derive(Debug, Clone)]
pub struct ReopenSchedule {
    gap: u32,
    ticks_left: u32,
    attempts: u32,
}

impl ReopenSchedule {
    pub fn new(config: &ReconnectConfig) -> Self {
        let gap = config.initial_gap_ticks.max(1);
        Self {
            gap,
            ticks_left: gap,
            attempts: 0,
        }
    }

    /// Count one poll tick; returns true when an attempt is due.
    ///
    /// Always false once the attempt budget is spent.
    pub fn tick(&mut self, config: &ReconnectConfig) -> bool {
        if self.exhausted(config) {
            return false;
        }
        self.ticks_left = self.ticks_left.saturating_sub(1);
        self.ticks_left == 0
    }

    /// Record that an attempt was made and schedule the next one.
    pub fn attempted(&mut self, config: &ReconnectConfig) {
        self.attempts += 1;
        self.gap = next_gap(self.gap, config);
        self.ticks_left = self.gap;
    }

    /// Restart the countdown without touching the attempt budget.
    pub fn rearm(&mut self) {
        self.ticks_left = self.gap;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn exhausted(&self, config: &ReconnectConfig) -> bool {
        self.attempts >= config.max_attempts
    }
}
