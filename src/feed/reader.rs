//! Connection-reader stage. Owns the connection exclusively; admin calls reach
//! it as messages instead of sharing a lock.

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::connection::{Dialer, Inbound, ResilientConnection};
use crate::error::ConnectionError;
use crate::pipeline::{Shutdown, ShutdownTrigger};

type Reply = oneshot::Sender<Result<(), ConnectionError>>;

#[derive(Debug)]
pub enum FeedCommand {
    Subscribe { instruments: Vec<String>, reply: Reply },
    Unsubscribe { instruments: Vec<String>, reply: Reply },
    Status { reply: oneshot::Sender<FeedStatus> },
}

/// Read-only view of the reader's state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedStatus {
    pub subscriptions: Vec<String>,
    pub reconnects: u64,
    pub frames: u64,
}

/// Cloneable client side of the reader's command channel
#[derive(Debug, Clone)]
pub struct FeedHandle {
    tx: mpsc::UnboundedSender<FeedCommand>,
}

impl FeedHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FeedCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    async fn request(
        &self,
        build: impl FnOnce(Reply) -> FeedCommand,
    ) -> Result<(), ConnectionError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| ConnectionError::FeedClosed)?;
        response.await.map_err(|_| ConnectionError::FeedClosed)?
    }

    pub async fn subscribe(&self, instrument: &str) -> Result<(), ConnectionError> {
        let instruments = vec![instrument.to_string()];
        self.request(|reply| FeedCommand::Subscribe { instruments, reply })
            .await
    }

    pub async fn unsubscribe(&self, instrument: &str) -> Result<(), ConnectionError> {
        let instruments = vec![instrument.to_string()];
        self.request(|reply| FeedCommand::Unsubscribe { instruments, reply })
            .await
    }

    pub async fn status(&self) -> Result<FeedStatus, ConnectionError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(FeedCommand::Status { reply })
            .map_err(|_| ConnectionError::FeedClosed)?;
        response.await.map_err(|_| ConnectionError::FeedClosed)
    }
}

enum Step {
    Stop,
    Command(FeedCommand),
    CommandsClosed,
    Read(Result<Inbound, ConnectionError>),
}

pub struct FeedReader<D: Dialer> {
    connection: ResilientConnection<D>,
    commands: mpsc::UnboundedReceiver<FeedCommand>,
    frames: u64,
}

impl<D: Dialer> FeedReader<D> {
    pub fn new(
        connection: ResilientConnection<D>,
        commands: mpsc::UnboundedReceiver<FeedCommand>,
    ) -> Self {
        Self {
            connection,
            commands,
            frames: 0,
        }
    }

    pub fn connection_mut(&mut self) -> &mut ResilientConnection<D> {
        &mut self.connection
    }

    fn status(&self) -> FeedStatus {
        FeedStatus {
            subscriptions: self.connection.subscriptions().snapshot(),
            reconnects: self.connection.reconnects(),
            frames: self.frames,
        }
    }

    /// Pump frames downstream until shutdown, a fatal error, or downstream closes
    pub async fn run(
        mut self,
        frames_tx: mpsc::Sender<Vec<u8>>,
        mut shutdown: Shutdown,
        trigger: ShutdownTrigger,
    ) -> Result<(), ConnectionError> {
        let mut commands_open = true;

        let result = loop {
            let step = tokio::select! {
                biased;
                _ = shutdown.cancelled() => Step::Stop,
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => Step::Command(command),
                    None => Step::CommandsClosed,
                },
                inbound = self.connection.read_frame() => Step::Read(inbound),
            };

            match step {
                Step::Stop => break Ok(()),
                Step::CommandsClosed => commands_open = false,
                Step::Command(command) => {
                    if let Err(err) = self.handle_command(command).await {
                        break Err(err);
                    }
                }
                Step::Read(Ok(Inbound::Frame(frame))) => {
                    self.frames += 1;
                    tracing::trace!(frame = %String::from_utf8_lossy(&frame), "Inbound frame");
                    let sent = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => false,
                        sent = frames_tx.send(frame) => sent.is_ok(),
                    };
                    if !sent {
                        break Ok(());
                    }
                }
                Step::Read(Ok(Inbound::Reconnected)) => {
                    if let Err(err) = self.connection.resubscribe().await {
                        break Err(err);
                    }
                }
                Step::Read(Err(err)) => break Err(err),
            }
        };

        if let Err(err) = &result {
            tracing::error!(error = %err, "Feed reader failed, shutting down pipeline");
            trigger.trigger();
        }

        if let Err(err) = self.connection.close().await {
            tracing::debug!(error = %err, "Error closing market data connection");
        }
        tracing::info!(frames = self.frames, "Feed reader stopped");

        result
    }

    /// Apply an admin command; only fatal connection errors abort the reader
    async fn handle_command(&mut self, command: FeedCommand) -> Result<(), ConnectionError> {
        let (outcome, reply) = match command {
            FeedCommand::Status { reply } => {
                let _ = reply.send(self.status());
                return Ok(());
            }
            FeedCommand::Subscribe { instruments, reply } => {
                (self.connection.subscribe(&instruments).await, reply)
            }
            FeedCommand::Unsubscribe { instruments, reply } => {
                (self.connection.unsubscribe(&instruments).await, reply)
            }
        };

        match outcome {
            Err(err) if err.is_fatal() => {
                let _ = reply.send(Err(ConnectionError::FeedClosed));
                Err(err)
            }
            other => {
                let _ = reply.send(other);
                Ok(())
            }
        }
    }
}
