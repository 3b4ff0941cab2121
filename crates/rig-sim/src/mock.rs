//! Deterministic waypoint simulator
//!
//! On seed the rig jumps to a fixed frequency/mode. Each [`MockRig::advance`]
//! then moves to the next waypoint, looping at the end of the list. Commands
//! mutate the simulated state directly.

use serde::Serialize;

/// A stop on the simulated tuning schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Waypoint {
    pub frequency_hz: u64,
    pub mode: &'static str,
}

/// Seed state: 20m FT8
pub const SEED: Waypoint = Waypoint {
    frequency_hz: 14_074_000,
    mode: "USB",
};

/// Default tuning schedule
pub const DEFAULT_WAYPOINTS: &[Waypoint] = &[
    Waypoint {
        frequency_hz: 7_074_000,
        mode: "LSB",
    },
    Waypoint {
        frequency_hz: 21_074_000,
        mode: "USB",
    },
    Waypoint {
        frequency_hz: 10_136_000,
        mode: "USB",
    },
    Waypoint {
        frequency_hz: 14_074_000,
        mode: "USB",
    },
];

/// Default filter width reported by the simulator (Hz)
const DEFAULT_FILTER_WIDTH: u32 = 2400;

/// Full simulated state after a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MockSnapshot {
    pub frequency_hz: u64,
    pub mode: String,
    pub filter_width: u32,
    pub ptt: bool,
}

/// Deterministic simulated rig
#[derive(Debug, Clone)]
pub struct MockRig {
    waypoints: Vec<Waypoint>,
    next: usize,
    frequency_hz: u64,
    mode: String,
    filter_width: u32,
    ptt: bool,
}

impl MockRig {
    /// Create a rig that follows [`DEFAULT_WAYPOINTS`]
    pub fn new() -> Self {
        Self::with_waypoints(DEFAULT_WAYPOINTS.to_vec())
    }

    /// Create a rig with a custom schedule
    pub fn with_waypoints(waypoints: Vec<Waypoint>) -> Self {
        Self {
            waypoints,
            next: 0,
            frequency_hz: 0,
            mode: String::new(),
            filter_width: 0,
            ptt: false,
        }
    }

    /// Reset to the seed state and rewind the schedule
    pub fn seed(&mut self) -> MockSnapshot {
        self.next = 0;
        self.frequency_hz = SEED.frequency_hz;
        self.mode = SEED.mode.to_string();
        self.filter_width = DEFAULT_FILTER_WIDTH;
        self.ptt = false;
        self.snapshot()
    }

    /// Move to the next waypoint, looping at the end
    pub fn advance(&mut self) -> MockSnapshot {
        if let Some(wp) = self.waypoints.get(self.next) {
            self.frequency_hz = wp.frequency_hz;
            self.mode = wp.mode.to_string();
            self.next = (self.next + 1) % self.waypoints.len();
        }
        self.snapshot()
    }

    pub fn set_frequency(&mut self, hz: u64) {
        self.frequency_hz = hz;
    }

    pub fn set_mode(&mut self, mode: &str) {
        self.mode = mode.trim().to_ascii_uppercase();
    }

    pub fn set_ptt(&mut self, on: bool) {
        self.ptt = on;
    }

    /// Current simulated state
    pub fn snapshot(&self) -> MockSnapshot {
        MockSnapshot {
            frequency_hz: self.frequency_hz,
            mode: self.mode.clone(),
            filter_width: self.filter_width,
            ptt: self.ptt,
        }
    }
}

impl Default for MockRig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_then_loop() {
        let mut rig = MockRig::new();
        assert_eq!(rig.seed().frequency_hz, 14_074_000);

        let visited: Vec<u64> = (0..5).map(|_| rig.advance().frequency_hz).collect();
        assert_eq!(
            visited,
            vec![7_074_000, 21_074_000, 10_136_000, 14_074_000, 7_074_000]
        );
    }

    #[test]
    fn test_seed_rewinds_schedule() {
        let mut rig = MockRig::new();
        rig.seed();
        rig.advance();
        rig.advance();
        rig.seed();
        assert_eq!(rig.advance().frequency_hz, 7_074_000);
    }

    #[test]
    fn test_commands_mutate_state() {
        let mut rig = MockRig::new();
        rig.seed();
        rig.set_frequency(3_573_000);
        rig.set_mode("data-usb");
        rig.set_ptt(true);

        let snap = rig.snapshot();
        assert_eq!(snap.frequency_hz, 3_573_000);
        assert_eq!(snap.mode, "DATA-USB");
        assert!(snap.ptt);
    }

    #[test]
    fn test_empty_schedule_holds_state() {
        let mut rig = MockRig::with_waypoints(Vec::new());
        rig.seed();
        assert_eq!(rig.advance().frequency_hz, SEED.frequency_hz);
    }
}
