//! Outgoing op delivery.
//!
//! A [`Room`](crate::Room) hands every flushed batch of local ops to its
//! [`Transport`]. Connection management, retries and the inbound direction
//! belong to the host; inbound ops are fed back through
//! [`Room::apply_remote_operations`](crate::Room::apply_remote_operations).

use std::{cell::RefCell, rc::Rc};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    Result,
    op::{Op, wire::encode_ops},
};

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TransportError {
    /// The receiving side of the transport has gone away
    #[error("Transport is closed")]
    Closed,
}

impl From<TransportError> for crate::Error {
    fn from(err: TransportError) -> Self {
        crate::Error::Transport(err)
    }
}

/// Sink for ops leaving the room.
pub trait Transport {
    /// Sends one flushed batch of ops, in order.
    fn send(&mut self, ops: &[Op]) -> Result<()>;
}

/// Sends each batch as an encoded JSON message over a tokio channel.
///
/// The receiving half is typically drained by a task that writes to the
/// server socket.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, ops: &[Op]) -> Result<()> {
        let message = encode_ops(ops)?;
        debug!(ops = ops.len(), bytes = message.len(), "Sending ops");
        self.tx
            .send(message)
            .map_err(|_| TransportError::Closed.into())
    }
}

/// Keeps sent batches in memory for the host to collect.
#[derive(Debug, Clone, Default)]
pub struct BufferedTransport {
    sent: Rc<RefCell<Vec<Vec<Op>>>>,
}

impl BufferedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns every batch sent so far.
    pub fn take(&self) -> Vec<Vec<Op>> {
        std::mem::take(&mut *self.sent.borrow_mut())
    }

    pub fn is_empty(&self) -> bool {
        self.sent.borrow().is_empty()
    }
}

impl Transport for BufferedTransport {
    fn send(&mut self, ops: &[Op]) -> Result<()> {
        self.sent.borrow_mut().push(ops.to_vec());
        Ok(())
    }
}
