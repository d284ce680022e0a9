//! # Tick Clock
//!
//! Turns real elapsed time into discrete simulated hours.
//!
//! ## Design
//!
//! The clock must:
//! - Accumulate in fixed point only, so two machines fed the same deltas
//!   fire the same ticks
//! - Fire one tick per whole hour in the accumulator, subtracting exactly
//!   one hour each time so no fraction is lost
//! - Cap the catch-up backlog so a stall cannot trigger a tick storm

use regnum_core::FixedPoint64;

use super::calendar::GameDate;

/// One fired tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickInfo {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Calendar date of the tick.
    pub date: GameDate,
}

impl TickInfo {
    /// Midnight was crossed.
    #[inline]
    #[must_use]
    pub const fn new_day(&self) -> bool {
        self.date.is_day_start()
    }

    /// A month began.
    #[inline]
    #[must_use]
    pub const fn new_month(&self) -> bool {
        self.date.is_month_start()
    }

    /// A year began.
    #[inline]
    #[must_use]
    pub const fn new_year(&self) -> bool {
        self.date.is_year_start()
    }
}

/// Fixed-point simulated-time accumulator.
#[derive(Clone, Debug)]
pub struct TickClock {
    /// Unconsumed simulated time, in real seconds at speed 1.
    accumulator: FixedPoint64,
    /// Real seconds per simulated hour at speed 1.
    hour_length: FixedPoint64,
    /// Speed multiplier.
    speed: FixedPoint64,
    paused: bool,
    /// Last fired tick.
    tick: u64,
    start_year: i32,
    /// Backlog cap, in ticks.
    max_ticks_per_advance: u32,
    /// Ticks dropped by the backlog cap.
    dropped_ticks: u64,
}

impl TickClock {
    /// Creates a clock at tick 0. `hour_length` must be positive.
    #[must_use]
    pub fn new(hour_length: FixedPoint64, start_year: i32, max_ticks_per_advance: u32) -> Self {
        Self {
            accumulator: FixedPoint64::ZERO,
            hour_length: hour_length.max(FixedPoint64::EPSILON),
            speed: FixedPoint64::ONE,
            paused: false,
            tick: 0,
            start_year,
            max_ticks_per_advance: max_ticks_per_advance.max(1),
            dropped_ticks: 0,
        }
    }

    /// Last fired tick (0 before the first).
    #[inline]
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Date of the last fired tick.
    #[must_use]
    pub fn date(&self) -> GameDate {
        GameDate::from_tick(self.start_year, self.tick)
    }

    /// Year of tick 0.
    #[inline]
    #[must_use]
    pub const fn start_year(&self) -> i32 {
        self.start_year
    }

    /// Current speed multiplier.
    #[inline]
    #[must_use]
    pub const fn speed(&self) -> FixedPoint64 {
        self.speed
    }

    /// Returns true while paused.
    #[inline]
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Ticks discarded by the backlog cap so far.
    #[inline]
    #[must_use]
    pub const fn dropped_ticks(&self) -> u64 {
        self.dropped_ticks
    }

    /// Unconsumed simulated time.
    #[inline]
    #[must_use]
    pub const fn accumulator(&self) -> FixedPoint64 {
        self.accumulator
    }

    /// Sets the speed multiplier. Negative values clamp to zero.
    pub fn set_speed(&mut self, speed: FixedPoint64) {
        self.speed = speed.max(FixedPoint64::ZERO);
        tracing::debug!("Clock speed set to {}", self.speed);
    }

    /// Stops accumulating time. Already accumulated hours still fire.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resumes accumulating time.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Adds `real_delta x speed` to the accumulator.
    ///
    /// Negative deltas count as zero. Returns the number of ticks now due.
    pub fn advance(&mut self, real_delta: FixedPoint64) -> u32 {
        if !self.paused {
            self.accumulator += real_delta.max(FixedPoint64::ZERO) * self.speed;
        }

        let cap = self.hour_length.mul_int(i64::from(self.max_ticks_per_advance));
        if self.accumulator >= cap + self.hour_length {
            let backlog = self.accumulator - cap;
            let excess = backlog
                .checked_div(self.hour_length)
                .map_or(0, FixedPoint64::to_int);
            self.dropped_ticks += u64::try_from(excess).unwrap_or(0);
            tracing::warn!(
                "Clock fell {} ticks behind, capping backlog at {}",
                excess,
                self.max_ticks_per_advance
            );
            let carry = backlog
                .checked_rem(self.hour_length)
                .unwrap_or(FixedPoint64::ZERO);
            self.accumulator = cap + carry;
        }
        self.pending_ticks()
    }

    /// Whole hours in the accumulator.
    #[must_use]
    pub fn pending_ticks(&self) -> u32 {
        self.accumulator
            .checked_div(self.hour_length)
            .map_or(0, |hours| u32::try_from(hours.to_int()).unwrap_or(0))
    }

    /// Fires the next tick if a whole hour has accumulated.
    pub fn poll_tick(&mut self) -> Option<TickInfo> {
        if self.accumulator < self.hour_length {
            return None;
        }
        self.accumulator -= self.hour_length;
        Some(self.fire())
    }

    /// Fires a tick regardless of the accumulator (single-stepping).
    pub fn force_tick(&mut self) -> TickInfo {
        self.fire()
    }

    /// Restores the tick counter, for loading a saved session.
    pub fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
        self.accumulator = FixedPoint64::ZERO;
    }

    fn fire(&mut self) -> TickInfo {
        self.tick += 1;
        TickInfo {
            tick: self.tick,
            date: GameDate::from_tick(self.start_year, self.tick),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(text: &str) -> FixedPoint64 {
        text.parse().unwrap()
    }

    #[test]
    fn test_fires_one_tick_per_hour() {
        let mut clock = TickClock::new(fp("0.5"), 1444, 24);
        assert_eq!(clock.advance(fp("0.3")), 0);
        assert_eq!(clock.poll_tick(), None);
        assert_eq!(clock.advance(fp("0.3")), 1);

        let info = clock.poll_tick().unwrap();
        assert_eq!(info.tick, 1);
        assert_eq!(info.date.hour, 1);
        assert_eq!(clock.accumulator(), fp("0.3") + fp("0.3") - fp("0.5"));
        assert_eq!(clock.poll_tick(), None);
    }

    #[test]
    fn test_remainder_is_carried_exactly() {
        let mut clock = TickClock::new(FixedPoint64::ONE, 1444, 100);
        let third = FixedPoint64::from_ratio(1, 3).unwrap();
        let mut fired = 0;
        for _ in 0..300 {
            clock.advance(third);
            while clock.poll_tick().is_some() {
                fired += 1;
            }
        }
        // 300 x floor(2^32 / 3) raw units is just short of 100 hours.
        assert_eq!(fired, 99);
        assert_eq!(clock.tick(), 99);
    }

    #[test]
    fn test_speed_and_pause() {
        let mut clock = TickClock::new(FixedPoint64::ONE, 1444, 24);
        clock.set_speed(FixedPoint64::from_int(3));
        assert_eq!(clock.advance(FixedPoint64::ONE), 3);

        clock.pause();
        assert_eq!(clock.advance(FixedPoint64::from_int(10)), 3);
        clock.resume();

        clock.set_speed(FixedPoint64::from_int(-2));
        assert_eq!(clock.speed(), FixedPoint64::ZERO);
        assert_eq!(clock.advance(FixedPoint64::from_int(5)), 3);
    }

    #[test]
    fn test_negative_delta_ignored() {
        let mut clock = TickClock::new(FixedPoint64::ONE, 1444, 24);
        clock.advance(FixedPoint64::HALF);
        clock.advance(FixedPoint64::from_int(-7));
        assert_eq!(clock.accumulator(), FixedPoint64::HALF);
    }

    #[test]
    fn test_backlog_is_capped() {
        let mut clock = TickClock::new(FixedPoint64::ONE, 1444, 4);
        assert_eq!(clock.advance(fp("10.25")), 4);
        assert_eq!(clock.dropped_ticks(), 6);
        let mut fired = 0;
        while clock.poll_tick().is_some() {
            fired += 1;
        }
        assert_eq!(fired, 4);
        assert_eq!(clock.accumulator(), fp("0.25"));
    }

    #[test]
    fn test_force_tick_and_boundaries() {
        let mut clock = TickClock::new(FixedPoint64::ONE, 1444, 24);
        let mut last = None;
        for _ in 0..24 {
            last = Some(clock.force_tick());
        }
        let info = last.unwrap();
        assert_eq!(info.tick, 24);
        assert!(info.new_day());
        assert!(!info.new_month());
        assert_eq!(clock.date().day, 2);
    }
}
