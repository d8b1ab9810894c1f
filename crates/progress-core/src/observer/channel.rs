use std::sync::Mutex;

use tokio::sync::{mpsc, watch};

use crate::models::ProgressFrame;
use crate::observer::{ClosedFuture, DeliveryError, ProgressSink};

/// In-process sink backed by an unbounded tokio channel.
pub struct ChannelSink {
    sender: Mutex<Option<mpsc::UnboundedSender<ProgressFrame>>>,
    closing: watch::Sender<bool>,
    // Loses its only receiver when the `ProgressReceiver` is dropped.
    receiver_alive: watch::Sender<()>,
}

pub struct ProgressReceiver {
    receiver: mpsc::UnboundedReceiver<ProgressFrame>,
    _alive: watch::Receiver<()>,
}

pub fn progress_channel() -> (ChannelSink, ProgressReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let (closing, _) = watch::channel(false);
    let (receiver_alive, alive) = watch::channel(());
    (
        ChannelSink {
            sender: Mutex::new(Some(sender)),
            closing,
            receiver_alive,
        },
        ProgressReceiver {
            receiver,
            _alive: alive,
        },
    )
}

impl ChannelSink {
    fn current_sender(&self) -> Option<mpsc::UnboundedSender<ProgressFrame>> {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.current_sender()
            .map(|sender| sender.is_closed())
            .unwrap_or(true)
    }
}

impl ProgressSink for ChannelSink {
    fn push(&self, frame: ProgressFrame) -> Result<(), DeliveryError> {
        let guard = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let sender = guard.as_ref().ok_or(DeliveryError::Closed)?;
        sender.send(frame).map_err(|_| DeliveryError::Closed)
    }

    fn close(&self) -> Result<(), DeliveryError> {
        // Dropping the last sender ends the receiver's stream once buffered
        // frames are drained.
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        self.closing.send_replace(true);
        Ok(())
    }

    // Holds no sender clone, so a pending watcher never keeps the stream open.
    fn closed(&self) -> ClosedFuture<'_> {
        let mut closing = self.closing.subscribe();
        Box::pin(async move {
            tokio::select! {
                _ = self.receiver_alive.closed() => {}
                _ = close_requested(&mut closing) => {}
            }
        })
    }
}

async fn close_requested(closing: &mut watch::Receiver<bool>) {
    while !*closing.borrow_and_update() {
        if closing.changed().await.is_err() {
            return;
        }
    }
}

impl ProgressReceiver {
    pub async fn recv(&mut self) -> Option<ProgressFrame> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ProgressFrame> {
        self.receiver.try_recv().ok()
    }

    /// Drains every frame already buffered without waiting.
    pub fn drain(&mut self) -> Vec<ProgressFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.receiver.try_recv() {
            frames.push(frame);
        }
        frames
    }
}
