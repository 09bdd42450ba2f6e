//! Adaptive keep-alive: pick the probe interval, never let the link idle out.
//!
//! The mesh silently drops links after roughly 30 seconds without traffic, so
//! a periodic non-empty probe is required. While the recorder is encoding
//! video the probe cadence backs off to a longer interval so it does not
//! compete with the encode workload; both levels stay well under the cutoff.

use std::time::Duration;

/// Interval policy for the keep-alive timer. The session restarts the timer
/// (cancel + start) whenever the selected interval changes; the interval of a
/// running timer is never mutated in place.
#[derive(Debug)]
pub struct KeepAlive {
    idle_interval: Duration,
    recording_interval: Duration,
    recording_active: bool,
    running: bool,
}

impl KeepAlive {
    pub fn new(idle_interval: Duration, recording_interval: Duration) -> Self {
        Self {
            idle_interval,
            recording_interval,
            recording_active: false,
            running: false,
        }
    }

    /// Interval for the current workload level.
    pub fn interval(&self) -> Duration {
        if self.recording_active {
            self.recording_interval
        } else {
            self.idle_interval
        }
    }

    pub fn recording_active(&self) -> bool {
        self.recording_active
    }

    /// Update the workload flag. Returns true when the selected interval
    /// changed and a running timer must be restarted.
    pub fn set_recording_active(&mut self, active: bool) -> bool {
        if self.recording_active == active {
            return false;
        }
        self.recording_active = active;
        true
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> KeepAlive {
        KeepAlive::new(Duration::from_secs(5), Duration::from_secs(15))
    }

    #[test]
    fn interval_increases_when_recording_starts() {
        let mut ka = engine();
        let before = ka.interval();
        assert!(ka.set_recording_active(true));
        assert!(ka.interval() > before);
    }

    #[test]
    fn interval_decreases_when_recording_stops() {
        let mut ka = engine();
        ka.set_recording_active(true);
        let before = ka.interval();
        assert!(ka.set_recording_active(false));
        assert!(ka.interval() < before);
    }

    #[test]
    fn unchanged_flag_needs_no_restart() {
        let mut ka = engine();
        assert!(!ka.set_recording_active(false));
        ka.set_recording_active(true);
        assert!(!ka.set_recording_active(true));
    }

    #[test]
    fn start_stop() {
        let mut ka = engine();
        assert!(!ka.is_running());
        ka.start();
        assert!(ka.is_running());
        ka.stop();
        assert!(!ka.is_running());
    }
}
