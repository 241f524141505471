use std::fmt;
use std::future::Future;
use std::time::Duration;

use num_enum::{FromPrimitive, IntoPrimitive};
use tracing::{debug, info, warn};

use crate::config::{OtaConfig, ABORT_TIMEOUT};
use crate::error::{OtaError, TransportError};
use crate::firmware::FirmwareImage;
use crate::status::{StatusLatch, WaitError};
use crate::transport::{Endpoint, OtaTransport, WriteKind};

/// Commands written to the OTA control characteristic
#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u8)]
pub enum ControlCommand {
    Start = 0x01,
    End = 0x02,
    Abort = 0xFF,
}

/// Status codes notified on the OTA control characteristic
#[derive(Debug, Copy, Clone, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum OtaStatus {
    Ready = 0x00,
    Busy = 0x01,
    Ok = 0x02,
    Error = 0x03,
    #[num_enum(catch_all)]
    Unknown(u8),
}

impl OtaStatus {
    /// Decode a notification payload. An empty payload is treated as 0xFF.
    pub fn from_notification(value: &[u8]) -> Self {
        Self::from(value.first().copied().unwrap_or(0xFF))
    }
}

impl fmt::Display for OtaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtaStatus::Ready => f.write_str("READY"),
            OtaStatus::Busy => f.write_str("BUSY"),
            OtaStatus::Ok => f.write_str("OK"),
            OtaStatus::Error => f.write_str("ERROR"),
            OtaStatus::Unknown(byte) => write!(f, "{:#04x}", byte),
        }
    }
}

/// Where an attempt currently is
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Phase {
    Idle,
    Starting,
    Transferring,
    Finishing,
    Succeeded,
    Failed,
    Aborted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Starting => "starting",
            Phase::Transferring => "transferring",
            Phase::Finishing => "finishing",
            Phase::Succeeded => "succeeded",
            Phase::Failed => "failed",
            Phase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Terminal result of one attempt
#[derive(Debug)]
pub enum Outcome {
    Succeeded,
    Failed(OtaError),
    Aborted,
}

impl Outcome {
    pub fn into_result(self) -> Result<(), OtaError> {
        match self {
            Outcome::Succeeded => Ok(()),
            Outcome::Failed(err) => Err(err),
            Outcome::Aborted => Err(OtaError::Aborted),
        }
    }
}

/// Bytes written to the data endpoint so far
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Progress {
    pub sent: usize,
    pub total: usize,
}

/// Mutable state of one attempt. `phase` ends as Succeeded, Failed or Aborted.
#[derive(Debug)]
pub struct TransferSession {
    pub phase: Phase,
    pub sent: usize,
    pub total: usize,
    pub last_status: Option<OtaStatus>,
}

/// Drives START / data / END over a connected transport.
///
/// The engine subscribes to control notifications on construction, so every
/// command it sends has a listener in place.
pub struct OtaEngine<'a, T: OtaTransport + ?Sized> {
    transport: &'a T,
    latch: StatusLatch,
    config: OtaConfig,
    session: TransferSession,
}

impl<'a, T: OtaTransport + ?Sized> OtaEngine<'a, T> {
    pub async fn new(transport: &'a T, config: OtaConfig) -> Result<OtaEngine<'a, T>, OtaError> {
        let latch = StatusLatch::new();
        transport
            .subscribe(latch.clone())
            .await
            .map_err(|source| OtaError::Transport {
                phase: Phase::Idle,
                source,
            })?;
        Ok(OtaEngine {
            transport,
            latch,
            config,
            session: TransferSession {
                phase: Phase::Idle,
                sent: 0,
                total: 0,
                last_status: None,
            },
        })
    }

    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    /// Run one attempt to completion.
    ///
    /// `cancel` is raced against every suspension point. When it resolves
    /// first, the in-flight operation is dropped and `ABORT` is sent.
    pub async fn run<F, P>(&mut self, image: &FirmwareImage, cancel: F, mut progress: P) -> Outcome
    where
        F: Future<Output = ()>,
        P: FnMut(Progress),
    {
        let result = {
            let attempt = self.attempt(image, &mut progress);
            tokio::pin!(cancel);
            tokio::select! {
                biased;
                _ = &mut cancel => None,
                result = attempt => Some(result),
            }
        };

        match result {
            None => {
                warn!(phase = %self.session.phase, sent = self.session.sent, "OTA cancelled");
                self.abort().await;
                Outcome::Aborted
            }
            Some(Ok(())) => {
                self.enter(Phase::Succeeded);
                Outcome::Succeeded
            }
            Some(Err(err)) => {
                self.enter(Phase::Failed);
                Outcome::Failed(err)
            }
        }
    }

    /// Tell the device to drop the update. Does not wait for any reply, and
    /// gives up on a stalled link after [`ABORT_TIMEOUT`].
    pub async fn abort(&mut self) {
        let payload = [u8::from(ControlCommand::Abort)];
        let write = self
            .transport
            .write(Endpoint::Control, &payload, WriteKind::Unconfirmed);
        match tokio::time::timeout(ABORT_TIMEOUT, write).await {
            Err(_) => warn!("ABORT not queued within {:?}", ABORT_TIMEOUT),
            Ok(Err(err)) => warn!(error = %err, "failed to send ABORT"),
            Ok(Ok(())) => {}
        }
        self.enter(Phase::Aborted);
    }

    async fn attempt<P: FnMut(Progress)>(&mut self, image: &FirmwareImage, progress: &mut P) -> Result<(), OtaError> {
        self.session.total = image.len();
        self.start().await?;
        self.transfer(image, progress).await?;
        self.finish().await
    }

    async fn start(&mut self) -> Result<(), OtaError> {
        self.enter(Phase::Starting);
        let timeout = self.config.start_timeout;
        match self.command(ControlCommand::Start, timeout).await? {
            OtaStatus::Busy => Ok(()),
            status => Err(OtaError::UnexpectedStatus {
                phase: Phase::Starting,
                status,
            }),
        }
    }

    async fn transfer<P: FnMut(Progress)>(&mut self, image: &FirmwareImage, progress: &mut P) -> Result<(), OtaError> {
        self.enter(Phase::Transferring);
        info!(
            total = image.len(),
            chunk_size = self.config.chunk_size,
            "sending firmware"
        );
        for chunk in image.chunks(self.config.chunk_size) {
            self.transport
                .write(Endpoint::Data, chunk, WriteKind::Unconfirmed)
                .await
                .map_err(|source| OtaError::Transport {
                    phase: Phase::Transferring,
                    source,
                })?;
            self.session.sent += chunk.len();
            progress(Progress {
                sent: self.session.sent,
                total: self.session.total,
            });
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), OtaError> {
        self.enter(Phase::Finishing);
        let timeout = self.config.finish_timeout;
        match self.command(ControlCommand::End, timeout).await {
            Ok(OtaStatus::Ok) => Ok(()),
            Ok(status) => Err(OtaError::FinishFailed { status }),
            // The device reboots right after reporting OK, so the link may
            // drop before the write response or the wait completes.
            Err(err) => match self.latch.last() {
                Some(OtaStatus::Ok) => {
                    debug!(error = %err, "link lost after OK, device is rebooting");
                    self.session.last_status = Some(OtaStatus::Ok);
                    Ok(())
                }
                Some(status) => {
                    debug!(error = %err, %status, "link lost after status");
                    self.session.last_status = Some(status);
                    Err(OtaError::FinishFailed { status })
                }
                None => Err(err),
            },
        }
    }

    /// Confirmed write of `command`, then wait for the status it triggers.
    async fn command(&mut self, command: ControlCommand, timeout: Duration) -> Result<OtaStatus, OtaError> {
        let phase = self.session.phase;
        let wait = self.latch.arm();

        debug!(?command, %phase, "sending control command");
        let payload = [u8::from(command)];
        let write = self
            .transport
            .write(Endpoint::Control, &payload, WriteKind::Confirmed);
        match tokio::time::timeout(timeout, write).await {
            Err(_) => return Err(OtaError::Timeout { phase, timeout }),
            Ok(Err(source)) => return Err(OtaError::Transport { phase, source }),
            Ok(Ok(())) => {}
        }

        let status = wait.wait(timeout).await.map_err(|err| match err {
            WaitError::Timeout => OtaError::Timeout { phase, timeout },
            WaitError::Closed => OtaError::Transport {
                phase,
                source: TransportError::Disconnected,
            },
        })?;
        debug!(%status, %phase, "status received");
        self.session.last_status = Some(status);
        Ok(status)
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = %self.session.phase, to = %phase, "OTA phase");
        self.session.phase = phase;
    }
}
