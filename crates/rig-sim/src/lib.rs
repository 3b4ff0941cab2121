//! Rig Simulation Library
//!
//! Simulated transceivers for testing the bridge without physical hardware:
//!
//! - **MockRig**: deterministic waypoint simulator behind the Mock adapter
//! - **VirtualRadio**: answers CAT/CI-V queries with protocol-accurate replies
//! - **run_virtual_radio_task**: serves a VirtualRadio over any async stream
//!
//! # Example
//!
//! ```rust
//! use rig_sim::MockRig;
//!
//! let mut rig = MockRig::new();
//! let seeded = rig.seed();
//! assert_eq!(seeded.frequency_hz, 14_074_000);
//!
//! let next = rig.advance();
//! assert_eq!(next.frequency_hz, 7_074_000);
//! ```

pub mod mock;
pub mod radio;
pub mod radio_task;

pub use mock::{MockRig, MockSnapshot, Waypoint, DEFAULT_WAYPOINTS};
pub use radio::VirtualRadio;
pub use radio_task::{run_virtual_radio_task, VirtualRadioCommand};
