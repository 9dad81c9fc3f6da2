//! Capture countdown state machine.
//!
//! Pure state: the daemon owns the one-second timer and feeds ticks in.
//! A presence latch remembers that the current run of frames contains a
//! face, so a face that stays in frame starts at most one countdown.

use serde::Serialize;

pub const DEFAULT_COUNTDOWN_SECS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "remaining", rename_all = "lowercase")]
pub enum CountdownState {
    Idle,
    Counting(u32),
}

/// What a detection tick did to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// First face after an empty run: countdown started.
    Started,
    /// Face left while latched: countdown reset, no capture.
    Reset,
    Unchanged,
}

/// Result of one elapsed second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Remaining(u32),
    /// Reached zero: capture now. Emitted once per countdown.
    Fire,
    /// Not counting; the tick is stale.
    Idle,
}

#[derive(Debug, Clone)]
pub struct Countdown {
    state: CountdownState,
    from: u32,
    latched: bool,
}

impl Default for Countdown {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTDOWN_SECS)
    }
}

impl Countdown {
    /// `from` is clamped to at least one second.
    pub fn new(from: u32) -> Self {
        Self {
            state: CountdownState::Idle,
            from: from.max(1),
            latched: false,
        }
    }

    pub fn state(&self) -> CountdownState {
        self.state
    }

    pub fn remaining(&self) -> Option<u32> {
        match self.state {
            CountdownState::Counting(n) => Some(n),
            CountdownState::Idle => None,
        }
    }

    pub fn is_counting(&self) -> bool {
        matches!(self.state, CountdownState::Counting(_))
    }

    /// Feed one detection tick's face count.
    pub fn observe(&mut self, faces: usize) -> Presence {
        if faces > 0 && !self.latched {
            self.latched = true;
            if self.start() {
                return Presence::Started;
            }
            Presence::Unchanged
        } else if faces == 0 && self.latched {
            self.clear();
            Presence::Reset
        } else {
            Presence::Unchanged
        }
    }

    /// `Idle → Counting(from)`. No-op while already counting.
    pub fn start(&mut self) -> bool {
        if self.is_counting() {
            return false;
        }
        self.state = CountdownState::Counting(self.from);
        true
    }

    /// Return to `Idle` without firing. Returns whether a countdown was running.
    pub fn reset(&mut self) -> bool {
        let was_counting = self.is_counting();
        self.state = CountdownState::Idle;
        was_counting
    }

    /// Reset and drop the presence latch, as after teardown or a faceless tick.
    pub fn clear(&mut self) {
        self.reset();
        self.latched = false;
    }

    /// Advance by one second.
    pub fn tick(&mut self) -> Tick {
        match self.state {
            CountdownState::Idle => Tick::Idle,
            CountdownState::Counting(n) if n <= 1 => {
                self.state = CountdownState::Idle;
                Tick::Fire
            }
            CountdownState::Counting(n) => {
                self.state = CountdownState::Counting(n - 1);
                Tick::Remaining(n - 1)
            }
        }
    }
}
