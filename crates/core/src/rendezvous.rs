//! Zero-capacity hand-off channel.
//!
//! A `send` completes only once a receiver has taken the item, so a producer can
//! never run ahead of its consumer. The receiver drives the exchange: each `recv`
//! offers a fresh one-shot slot and the sender fills the next offered slot.

use std::fmt;

use tokio::sync::{mpsc, oneshot};

/// The receiving half went away before the item was taken.
#[derive(Debug, PartialEq, Eq)]
pub struct SendError<T>(pub T);

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("rendezvous receiver dropped")
    }
}

impl<T: fmt::Debug> std::error::Error for SendError<T> {}

/// Create a connected sender/receiver pair.
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let (slots_tx, slots_rx) = mpsc::channel(1);
    (Sender { slots: slots_rx }, Receiver { slots: slots_tx })
}

/// Sending half. Dropping it closes the channel.
#[derive(Debug)]
pub struct Sender<T> {
    slots: mpsc::Receiver<oneshot::Sender<T>>,
}

impl<T> Sender<T> {
    /// Hand `item` to the receiver, waiting until it has been taken.
    ///
    /// Cancel safe: dropping the future before it resolves drops `item` without
    /// delivering it.
    pub async fn send(&mut self, mut item: T) -> Result<(), SendError<T>> {
        loop {
            let Some(slot) = self.slots.recv().await else {
                return Err(SendError(item));
            };
            match slot.send(item) {
                Ok(()) => return Ok(()),
                // The receiver abandoned that recv; wait for the next offer.
                Err(returned) => item = returned,
            }
        }
    }
}

/// Receiving half. Dropping it makes pending and future sends fail.
#[derive(Debug)]
pub struct Receiver<T> {
    slots: mpsc::Sender<oneshot::Sender<T>>,
}

impl<T> Receiver<T> {
    /// Wait for the next item. Returns `None` once the sender is dropped.
    pub async fn recv(&mut self) -> Option<T> {
        let (slot_tx, slot_rx) = oneshot::channel();
        self.slots.send(slot_tx).await.ok()?;
        slot_rx.await.ok()
    }
}
