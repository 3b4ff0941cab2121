//! Virtual radio actor task
//!
//! Owns a [`VirtualRadio`] and serves it over an async stream, the way a real
//! transceiver sits at the far end of a serial cable. A command channel plays
//! the part of the front panel.

use std::io;

use rig_protocol::Protocol;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::VirtualRadio;

/// Front-panel actions for a running virtual radio
#[derive(Debug, Clone)]
pub enum VirtualRadioCommand {
    /// Turn the VFO knob
    SetFrequency(u64),
    /// Press a mode button
    SetMode(String),
    /// Key or unkey
    SetPtt(bool),
    /// Write raw bytes onto the line (noise, partial frames)
    Inject(Vec<u8>),
    /// Shutdown the virtual radio actor
    Shutdown,
}

/// Run the virtual radio actor task
///
/// Replies to whatever the controller writes, applies front-panel commands
/// and, for CI-V radios, announces front-panel changes with transceive frames.
/// Returns when the stream closes or on `Shutdown`.
pub async fn run_virtual_radio_task<S>(
    mut stream: S,
    mut radio: VirtualRadio,
    mut cmd_rx: mpsc::Receiver<VirtualRadioCommand>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 256];
    info!("Starting virtual radio task ({})", radio.protocol().name());

    loop {
        tokio::select! {
            result = stream.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!("Virtual radio stream closed");
                        break;
                    }
                    Ok(n) => {
                        let reply = radio.handle_input(&buf[..n]);
                        if !reply.is_empty() {
                            stream.write_all(&reply).await?;
                            stream.flush().await?;
                        }
                    }
                    Err(e) => return Err(e),
                }
            }

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    break;
                };
                let announce = match cmd {
                    VirtualRadioCommand::SetFrequency(hz) => {
                        radio.set_frequency(hz);
                        true
                    }
                    VirtualRadioCommand::SetMode(mode) => radio.set_mode(&mode),
                    VirtualRadioCommand::SetPtt(on) => {
                        radio.set_ptt(on);
                        false
                    }
                    VirtualRadioCommand::Inject(bytes) => {
                        stream.write_all(&bytes).await?;
                        stream.flush().await?;
                        false
                    }
                    VirtualRadioCommand::Shutdown => {
                        debug!("Virtual radio shutting down");
                        break;
                    }
                };
                if announce && radio.protocol() == Protocol::IcomCiv {
                    stream.write_all(&radio.transceive_frames()).await?;
                    stream.flush().await?;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_answers_poll_over_stream() {
        let (mut controller, radio_side) = tokio::io::duplex(256);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let task = tokio::spawn(run_virtual_radio_task(
            radio_side,
            VirtualRadio::new(Protocol::Kenwood),
            cmd_rx,
        ));

        controller.write_all(b"FA;").await.unwrap();
        let mut buf = [0u8; 64];
        let n = timeout(Duration::from_secs(1), controller.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"FA00014074000;");

        cmd_tx.send(VirtualRadioCommand::Shutdown).await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_civ_front_panel_change_is_announced() {
        let (mut controller, radio_side) = tokio::io::duplex(256);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        tokio::spawn(run_virtual_radio_task(
            radio_side,
            VirtualRadio::new(Protocol::IcomCiv),
            cmd_rx,
        ));

        cmd_tx
            .send(VirtualRadioCommand::SetFrequency(7_074_000))
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let n = timeout(Duration::from_secs(1), controller.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..5], &[0xFE, 0xFE, 0xE0, 0x94, 0x00]);
        assert!(n >= 11);
    }
}
