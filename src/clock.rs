//! Local clock estimation between authoritative updates.
//!
//! The server is the only source of truth for remaining time. Between its
//! updates the side to move is counted down locally from the last banked
//! reading; every authoritative update replaces the bank and the baseline, so
//! local drift never outlives one update interval.

use std::time::{Duration, Instant};

use crate::protocol::Color;

/// Remaining time for both sides, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockReading {
    pub white_ms: u64,
    pub black_ms: u64,
}

impl ClockReading {
    pub fn new(white_ms: u64, black_ms: u64) -> Self {
        Self { white_ms, black_ms }
    }

    /// Remaining time for `color`.
    pub fn for_color(&self, color: Color) -> u64 {
        match color {
            Color::White => self.white_ms,
            Color::Black => self.black_ms,
        }
    }

    fn minus(mut self, color: Color, elapsed: Duration) -> Self {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        match color {
            Color::White => self.white_ms = self.white_ms.saturating_sub(elapsed_ms),
            Color::Black => self.black_ms = self.black_ms.saturating_sub(elapsed_ms),
        }
        self
    }
}

/// Two-sided countdown corrected by the server.
#[derive(Debug, Clone, Default)]
pub struct ClockSync {
    /// Reading at `segment_start`.
    banked: ClockReading,
    segment_start: Option<Instant>,
    /// Side currently counting down. `None` while stopped.
    active: Option<Color>,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace both clocks with server values measured at `as_of`.
    pub fn on_authoritative_clocks(&mut self, white_ms: u64, black_ms: u64, as_of: Instant) {
        self.banked = ClockReading::new(white_ms, black_ms);
        self.segment_start = Some(as_of);
    }

    /// Switch which side is counting down, banking the time the previous side
    /// used so far. `None` stops both clocks.
    pub fn set_active(&mut self, side: Option<Color>, now: Instant) {
        self.banked = self.reading_at(now);
        self.segment_start = Some(now);
        self.active = side;
    }

    /// Stop both clocks at their current values.
    pub fn stop(&mut self, now: Instant) {
        self.set_active(None, now);
    }

    /// Current estimate. Does not move the baseline.
    pub fn tick(&self, now: Instant) -> ClockReading {
        self.reading_at(now)
    }

    /// The side counting down, if any.
    pub fn active(&self) -> Option<Color> {
        self.active
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// The side whose clock has run out, if any.
    pub fn flagged(&self, now: Instant) -> Option<Color> {
        let reading = self.reading_at(now);
        [Color::White, Color::Black]
            .into_iter()
            .find(|c| reading.for_color(*c) == 0)
    }

    fn reading_at(&self, now: Instant) -> ClockReading {
        match (self.active, self.segment_start) {
            (Some(side), Some(start)) => self
                .banked
                .minus(side, now.saturating_duration_since(start)),
            _ => self.banked,
        }
    }
}

/// Render milliseconds as `MM:SS`, flooring to whole seconds.
pub fn format_clock(ms: u64) -> String {
    let seconds = ms / 1000;
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn only_active_side_counts_down() {
        let t0 = Instant::now();
        let mut clock = ClockSync::new();
        clock.on_authoritative_clocks(60_000, 60_000, t0);
        clock.set_active(Some(Color::White), t0);

        let reading = clock.tick(t0 + ms(1_500));
        assert_eq!(reading, ClockReading::new(58_500, 60_000));
    }

    #[test]
    fn switching_sides_banks_elapsed_time() {
        let t0 = Instant::now();
        let mut clock = ClockSync::new();
        clock.on_authoritative_clocks(10_000, 10_000, t0);
        clock.set_active(Some(Color::White), t0);
        clock.set_active(Some(Color::Black), t0 + ms(2_000));

        let reading = clock.tick(t0 + ms(5_000));
        assert_eq!(reading, ClockReading::new(8_000, 7_000));
    }

    #[test]
    fn floors_at_zero() {
        let t0 = Instant::now();
        let mut clock = ClockSync::new();
        clock.on_authoritative_clocks(500, 1_000, t0);
        clock.set_active(Some(Color::White), t0);

        let reading = clock.tick(t0 + ms(10_000));
        assert_eq!(reading.white_ms, 0);
        assert_eq!(reading.black_ms, 1_000);
        assert_eq!(clock.flagged(t0 + ms(10_000)), Some(Color::White));
    }

    #[test]
    fn authoritative_update_resets_estimate() {
        let t0 = Instant::now();
        let mut clock = ClockSync::new();
        clock.on_authoritative_clocks(30_000, 30_000, t0);
        clock.set_active(Some(Color::Black), t0);
        assert_eq!(clock.tick(t0 + ms(4_000)).black_ms, 26_000);

        // Server says black actually has more time left.
        clock.on_authoritative_clocks(30_000, 27_500, t0 + ms(4_000));
        assert_eq!(clock.tick(t0 + ms(4_000)).black_ms, 27_500);
        assert_eq!(clock.tick(t0 + ms(5_000)).black_ms, 26_500);
    }

    #[test]
    fn inactive_side_never_decreases_between_updates() {
        let t0 = Instant::now();
        let mut clock = ClockSync::new();
        clock.on_authoritative_clocks(90_000, 90_000, t0);
        clock.set_active(Some(Color::White), t0);

        let mut previous_black = clock.tick(t0).black_ms;
        let mut previous_white = clock.tick(t0).white_ms;
        for step in 1..=200 {
            let reading = clock.tick(t0 + ms(step * 37));
            assert_eq!(reading.black_ms, previous_black);
            assert!(reading.white_ms <= previous_white);
            previous_black = reading.black_ms;
            previous_white = reading.white_ms;
        }
    }

    #[test]
    fn stopped_clock_is_frozen() {
        let t0 = Instant::now();
        let mut clock = ClockSync::new();
        clock.on_authoritative_clocks(5_000, 5_000, t0);
        clock.set_active(Some(Color::White), t0);
        clock.stop(t0 + ms(1_000));
        assert!(!clock.is_running());
        assert_eq!(clock.tick(t0 + ms(9_000)), ClockReading::new(4_000, 5_000));
    }

    #[test]
    fn earlier_instant_does_not_add_time() {
        let t0 = Instant::now();
        let mut clock = ClockSync::new();
        clock.on_authoritative_clocks(5_000, 5_000, t0 + ms(1_000));
        clock.set_active(Some(Color::White), t0 + ms(1_000));
        assert_eq!(clock.tick(t0).white_ms, 5_000);
    }

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(format_clock(600_000), "10:00");
        assert_eq!(format_clock(61_999), "01:01");
        assert_eq!(format_clock(0), "00:00");
    }
}
