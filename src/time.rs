//! Monotonic time and deadlines.
//!
//! All timer arithmetic in the protocol goes through [`Deadline`]. Handlers
//! never subtract raw timestamps; they arm a deadline when an event happens
//! and ask whether it has elapsed on a later iteration.

use std::{
    fmt,
    ops::Add,
    time::{Duration, Instant},
};

/// Milliseconds on a node-local monotonic clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The clock origin.
    pub const ZERO: Self = Self(0);

    /// Creates a timestamp from milliseconds since the clock origin.
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Milliseconds since the clock origin.
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub const fn saturating_since(self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        let ms = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(ms))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}s", self.0 / 1000, self.0 % 1000)
    }
}

/// A point in time after which a timer counts as fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Deadline(Timestamp);

impl Deadline {
    /// A deadline that has always elapsed.
    pub const EXPIRED: Self = Self(Timestamp::ZERO);

    /// Arms a deadline `duration` after `now`.
    pub fn after(now: Timestamp, duration: Duration) -> Self {
        Self(now + duration)
    }

    /// Returns true once `now` has reached the deadline.
    pub fn elapsed(self, now: Timestamp) -> bool {
        now >= self.0
    }

    /// Time left until the deadline, zero once elapsed.
    pub const fn remaining(self, now: Timestamp) -> Duration {
        self.0.saturating_since(now)
    }
}

/// Source of monotonic time.
///
/// Production nodes use [`SystemClock`]; simulations share a virtual clock
/// so that many nodes advance in lockstep.
pub trait Clock {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time measured from the moment the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock whose origin is now.
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let ms = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        Timestamp::from_millis(ms)
    }
}
