//! Simulated rig
//!
//! Seeds the state on connect, then walks the [`MockRig`] waypoint schedule
//! on a fixed step. Control requests mutate the simulation directly.

use std::time::Duration;

use rig_sim::{MockRig, MockSnapshot, Waypoint};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::{normalize_backend_mode, AdapterCommand, AdapterTask, RigCommand};
use crate::error::BridgeError;
use crate::state::{RigField, StateHandle};

/// Time between waypoints
pub const DEFAULT_STEP: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct MockAdapter {
    step: Duration,
    waypoints: Option<Vec<Waypoint>>,
    pub(super) task: Option<AdapterTask>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            step: DEFAULT_STEP,
            waypoints: None,
            task: None,
        }
    }

    /// Change the time between waypoints
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Follow a custom schedule
    pub fn with_waypoints(mut self, waypoints: Vec<Waypoint>) -> Self {
        self.waypoints = Some(waypoints);
        self
    }

    pub(super) fn spawn(&self, state: StateHandle) -> AdapterTask {
        let rig = match &self.waypoints {
            Some(waypoints) => MockRig::with_waypoints(waypoints.clone()),
            None => MockRig::new(),
        };
        let step = self.step;
        AdapterTask::spawn(move |cmd_rx| run_mock_adapter(rig, step, state, cmd_rx))
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot_fields(snap: MockSnapshot) -> Vec<RigField> {
    vec![
        RigField::FrequencyHz(snap.frequency_hz),
        RigField::Mode(snap.mode),
        RigField::FilterWidth(snap.filter_width),
        RigField::PttActive(snap.ptt),
    ]
}

fn execute(rig: &mut MockRig, command: RigCommand) -> Result<(), BridgeError> {
    match command {
        RigCommand::SetFrequency(hz) => rig.set_frequency(hz),
        RigCommand::SetMode(tag) => {
            let tag = normalize_backend_mode(&tag)
                .ok_or_else(|| BridgeError::Backend(format!("mock: unknown mode {:?}", tag)))?;
            rig.set_mode(&tag);
        }
        RigCommand::SetPtt(on) => rig.set_ptt(on),
    }
    Ok(())
}

/// Run the simulator until shutdown
pub async fn run_mock_adapter(
    mut rig: MockRig,
    step: Duration,
    state: StateHandle,
    mut cmd_rx: mpsc::Receiver<AdapterCommand>,
) {
    info!("Starting mock rig");
    let mut fields = vec![RigField::Connected(true)];
    fields.extend(snapshot_fields(rig.seed()));
    state.apply(fields).await;

    let mut ticker = interval_at(Instant::now() + step, step);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snap = rig.advance();
                debug!("mock: {} Hz {}", snap.frequency_hz, snap.mode);
                state.apply(snapshot_fields(snap)).await;
            }

            cmd = cmd_rx.recv() => match cmd {
                None | Some(AdapterCommand::Shutdown) => break,
                Some(AdapterCommand::Rig { command, response }) => {
                    let result = execute(&mut rig, command);
                    if result.is_ok() {
                        state.apply(snapshot_fields(rig.snapshot())).await;
                    }
                    let _ = response.send(result);
                }
            }
        }
    }

    state.set(RigField::Connected(false)).await;
    info!("Mock rig stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test(start_paused = true)]
    async fn test_seed_then_waypoints() {
        let (state, _task) = StateHandle::spawn();
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let waypoints = vec![
            Waypoint {
                frequency_hz: 7_074_000,
                mode: "LSB",
            },
            Waypoint {
                frequency_hz: 3_573_000,
                mode: "LSB",
            },
        ];
        let handle = tokio::spawn(run_mock_adapter(
            MockRig::with_waypoints(waypoints),
            Duration::from_secs(5),
            state.clone(),
            cmd_rx,
        ));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let seeded = state.snapshot().await.unwrap();
        assert!(seeded.connected);
        assert_eq!(seeded.frequency_hz, 14_074_000);
        assert_eq!(seeded.mode, "USB");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(state.snapshot().await.unwrap().frequency_hz, 7_074_000);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(state.snapshot().await.unwrap().frequency_hz, 3_573_000);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(state.snapshot().await.unwrap().frequency_hz, 7_074_000);

        cmd_tx.send(AdapterCommand::Shutdown).await.unwrap();
        handle.await.unwrap();
        assert!(!state.snapshot().await.unwrap().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_mutate_simulation() {
        let (state, _task) = StateHandle::spawn();
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let handle = tokio::spawn(run_mock_adapter(
            MockRig::new(),
            DEFAULT_STEP,
            state.clone(),
            cmd_rx,
        ));

        for command in [
            RigCommand::SetFrequency(18_100_000),
            RigCommand::SetMode("ft8".into()),
            RigCommand::SetPtt(true),
        ] {
            let (tx, rx) = oneshot::channel();
            cmd_tx
                .send(AdapterCommand::Rig {
                    command,
                    response: tx,
                })
                .await
                .unwrap();
            rx.await.unwrap().unwrap();
        }

        let snap = state.snapshot().await.unwrap();
        assert_eq!(snap.frequency_hz, 18_100_000);
        assert_eq!(snap.mode, "DATA-USB");
        assert!(snap.ptt_active);

        cmd_tx.send(AdapterCommand::Shutdown).await.unwrap();
        handle.await.unwrap();
    }
}
