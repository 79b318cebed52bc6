//! Performance measurement tools.

use std::{
    cell::RefCell,
    fmt,
    time::{Duration, Instant},
};

const MAX_DURATIONS: usize = 250;

/// A timer that can measure and average the time an operation takes.
///
/// Collected timings are averaged and reset when the timer is displayed using `{}`
/// ([`std::fmt::Display`]). Once more than a few hundred timings pile up without being displayed,
/// the oldest half is discarded.
pub struct Timer {
    name: &'static str,
    durations: RefCell<Vec<Duration>>,
}

impl Timer {
    /// Creates a new timer.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            durations: Default::default(),
        }
    }

    /// Invokes a closure, measuring and recording the time it takes.
    pub fn time<T>(&mut self, timee: impl FnOnce() -> T) -> T {
        let _guard = self.start();
        timee()
    }

    /// Starts timing an operation using a drop guard.
    ///
    /// When the returned [`TimerGuard`] is dropped, the time between the call to `start` and the
    /// drop is measured and recorded.
    pub fn start(&mut self) -> TimerGuard<'_> {
        TimerGuard {
            start: Instant::now(),
            timer: self,
        }
    }

    /// Returns the number of timings recorded since the timer was last displayed.
    pub fn len(&self) -> usize {
        self.durations.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stop(&mut self, start: Instant) {
        let durations = self.durations.get_mut();
        if durations.len() >= MAX_DURATIONS {
            durations.drain(..MAX_DURATIONS / 2);
        }
        durations.push(start.elapsed());
    }
}

/// Displays the average recorded time and resets it.
impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `Timer` isn't `Sync` and recording needs `&mut self`, so this borrow can't conflict.
        let mut durations = self.durations.borrow_mut();
        let len = durations.len();
        let avg_ms = if len == 0 {
            0.0
        } else {
            durations.iter().map(|d| d.as_secs_f32() * 1000.0).sum::<f32>() / len as f32
        };
        durations.clear();

        write!(f, "{}: {len}x{avg_ms:.01}ms", self.name)
    }
}

/// Guard returned by [`Timer::start`]. Stops timing the operation when dropped.
pub struct TimerGuard<'a> {
    start: Instant,
    timer: &'a mut Timer,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.timer.stop(self.start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_resets() {
        let mut timer = Timer::new("work");
        assert_eq!(timer.to_string(), "work: 0x0.0ms");

        assert_eq!(timer.time(|| 7), 7);
        drop(timer.start());
        assert_eq!(timer.len(), 2);
        assert!(timer.to_string().starts_with("work: 2x"));
        assert!(timer.is_empty());
    }

    #[test]
    fn bounded() {
        let mut timer = Timer::new("spin");
        for _ in 0..MAX_DURATIONS + 1 {
            drop(timer.start());
        }
        assert!(timer.len() <= MAX_DURATIONS);
    }
}
