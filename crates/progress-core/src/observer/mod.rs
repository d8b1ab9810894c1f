pub mod channel;

pub use channel::{ChannelSink, ProgressReceiver, progress_channel};

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::models::ProgressFrame;

pub type ClosedFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ObserverId(pub u64);

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DeliveryError {
    #[error("observer channel is closed")]
    Closed,

    #[error("observer delivery failed: {0}")]
    Failed(String),
}

/// Push-capable delivery channel for one watching client.
///
/// `push` must not block: the tracker calls it while holding its state lock,
/// and implementations must never call back into the tracker.
pub trait ProgressSink: Send + Sync {
    fn push(&self, frame: ProgressFrame) -> Result<(), DeliveryError>;

    fn close(&self) -> Result<(), DeliveryError>;

    /// Resolves once the remote end has gone away or `close` was called.
    fn closed(&self) -> ClosedFuture<'_>;
}
