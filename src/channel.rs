//! A communication channel used to send/receive messages to/from the peer.

use std::{fmt, future::Future};

use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{
    Mutex,
    mpsc::{Receiver, Sender, channel},
};

/// Errors related to sending / receiving / (de-)serializing messages.
#[derive(Debug)]
pub struct Error {
    /// The protocol phase during which the error occurred.
    pub phase: String,
    /// The specific error that was raised.
    pub reason: ErrorKind,
}

/// The specific error that occurred when trying to send / receive a message.
#[derive(Debug)]
pub enum ErrorKind {
    /// The (serialized) message could not be received over the channel.
    RecvError(String),
    /// The (serialized) message could not be sent over the channel.
    SendError(String),
    /// The message could not be (de-)serialized.
    SerdeError(String),
    /// The message is a Vec, but not of the expected length.
    InvalidLength,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            ErrorKind::RecvError(e) => write!(f, "recv error during '{}': {e}", self.phase),
            ErrorKind::SendError(e) => write!(f, "send error during '{}': {e}", self.phase),
            ErrorKind::SerdeError(e) => write!(f, "serde error during '{}': {e}", self.phase),
            ErrorKind::InvalidLength => write!(f, "invalid message length during '{}'", self.phase),
        }
    }
}

/// A two-party communication channel connected to the other party.
///
/// Sends must be buffered: a `send_bytes` may not wait for the peer to
/// receive the message, otherwise the symmetric exchanges used to open
/// masked shares would deadlock.
pub trait Channel {
    /// The error that can occur sending messages over the channel.
    type SendError: fmt::Debug;
    /// The error that can occur receiving messages over the channel.
    type RecvError: fmt::Debug;

    /// Sends a message to the other party.
    fn send_bytes(
        &self,
        msg: Vec<u8>,
    ) -> impl Future<Output = Result<(), Self::SendError>> + Send;

    /// Awaits the next message from the other party.
    fn recv_bytes(&self) -> impl Future<Output = Result<Vec<u8>, Self::RecvError>> + Send;
}

/// Serializes and sends a protocol message to the other party.
pub(crate) async fn send_to<C: Channel>(
    channel: &C,
    phase: &str,
    msg: &impl Serialize,
) -> Result<(), Error> {
    let msg = bincode::serialize(msg).map_err(|e| Error {
        phase: format!("sending {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })?;
    channel.send_bytes(msg).await.map_err(|e| Error {
        phase: phase.to_string(),
        reason: ErrorKind::SendError(format!("{e:?}")),
    })
}

/// Receives and deserializes a protocol message from the other party.
pub(crate) async fn recv_from<T: DeserializeOwned, C: Channel>(
    channel: &C,
    phase: &str,
) -> Result<T, Error> {
    let msg = channel.recv_bytes().await.map_err(|e| Error {
        phase: phase.to_string(),
        reason: ErrorKind::RecvError(format!("{e:?}")),
    })?;
    bincode::deserialize(&msg).map_err(|e| Error {
        phase: format!("receiving {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })
}

/// Receives and deserializes a Vec from the other party (checking its length).
pub(crate) async fn recv_vec_from<T: DeserializeOwned, C: Channel>(
    channel: &C,
    phase: &str,
    len: usize,
) -> Result<Vec<T>, Error> {
    let v: Vec<T> = recv_from(channel, phase).await?;
    if v.len() == len {
        Ok(v)
    } else {
        Err(Error {
            phase: phase.to_string(),
            reason: ErrorKind::InvalidLength,
        })
    }
}

/// Sends `msg` and awaits the peer's message of the same phase.
///
/// Both parties call this symmetrically, e.g. to open a masked share by
/// exchanging the two halves.
pub(crate) async fn exchange<T, C>(channel: &C, phase: &str, msg: &T) -> Result<T, Error>
where
    T: Serialize + DeserializeOwned,
    C: Channel,
{
    send_to(channel, phase, msg).await?;
    recv_from(channel, phase).await
}

/// A simple in-memory channel using tokio mpsc queues, for tests and local
/// simulation of both parties.
#[derive(Debug)]
pub struct SimpleChannel {
    s: Sender<Vec<u8>>,
    r: Mutex<Receiver<Vec<u8>>>,
}

impl SimpleChannel {
    /// Creates a connected pair of channels for the two parties.
    pub fn pair() -> (Self, Self) {
        let buffer_capacity = 1024;
        let (send_0_to_1, recv_0_to_1) = channel(buffer_capacity);
        let (send_1_to_0, recv_1_to_0) = channel(buffer_capacity);
        (
            SimpleChannel {
                s: send_0_to_1,
                r: Mutex::new(recv_1_to_0),
            },
            SimpleChannel {
                s: send_1_to_0,
                r: Mutex::new(recv_0_to_1),
            },
        )
    }
}

#[derive(Debug)]
/// The error raised by `recv` calls of a [`SimpleChannel`].
pub enum AsyncRecvError {
    /// The channel has been closed.
    Closed,
}

impl Channel for SimpleChannel {
    type SendError = tokio::sync::mpsc::error::SendError<Vec<u8>>;
    type RecvError = AsyncRecvError;

    async fn send_bytes(&self, msg: Vec<u8>) -> Result<(), Self::SendError> {
        self.s.send(msg).await
    }

    async fn recv_bytes(&self) -> Result<Vec<u8>, AsyncRecvError> {
        match self.r.lock().await.recv().await {
            Some(bytes) => Ok(bytes),
            None => Err(AsyncRecvError::Closed),
        }
    }
}
