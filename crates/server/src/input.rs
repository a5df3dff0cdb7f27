//! Bounded input queue between connection tasks and the tick loop.

use glam::Vec3;
use protocol::{EntityId, InputPayload};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

/// A control event targeting one entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Input {
    /// Entity the input applies to.
    pub target: EntityId,
    /// Acceleration-like vector; displacement is `acceleration * dt`.
    pub acceleration: Vec3,
    /// Client-supplied timestamp in milliseconds. Not used for ordering.
    pub client_time: i64,
}

impl Input {
    pub fn new(target: EntityId, acceleration: Vec3) -> Self {
        Self {
            target,
            acceleration,
            client_time: 0,
        }
    }

    /// Bind a decoded wire payload to the sending connection's entity.
    pub fn from_payload(target: EntityId, payload: &InputPayload) -> Self {
        Self {
            target,
            acceleration: payload.acceleration(),
            client_time: payload.t,
        }
    }
}

/// Multi-producer, single-consumer FIFO with a fixed capacity.
///
/// Producers wait when the queue is full. The tick loop drains without waiting.
#[derive(Debug)]
pub struct InputQueue {
    tx: mpsc::Sender<Input>,
    rx: Mutex<mpsc::Receiver<Input>>,
    capacity: usize,
}

impl InputQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        }
    }

    /// Enqueue an input, waiting for space if the queue is full.
    pub async fn push(&self, input: Input) {
        // The receiver lives as long as `self`, so the channel cannot be closed here.
        let _ = self.tx.send(input).await;
    }

    /// Enqueue without waiting. Returns the input back if the queue is full.
    pub fn try_push(&self, input: Input) -> Result<(), Input> {
        self.tx.try_send(input).map_err(|e| match e {
            TrySendError::Full(input) | TrySendError::Closed(input) => input,
        })
    }

    /// Take everything currently queued, up to one queue's worth.
    pub async fn drain(&self) -> Vec<Input> {
        let mut rx = self.rx.lock().await;
        let mut batch = Vec::with_capacity(self.len());
        while batch.len() < self.capacity {
            match rx.try_recv() {
                Ok(input) => batch.push(input),
                Err(_) => break,
            }
        }
        batch
    }

    /// Number of queued inputs.
    #[inline]
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
