//! Scoped snapshot subscriptions.

use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use super::live::{Mirror, Mirrored, Snapshot};

/// Stream of full snapshots of one collection.
///
/// The current snapshot arrives first, then one per observed change. The
/// registration is released when the subscription is dropped or closed.
pub struct Subscription<R: Mirrored> {
    id: u64,
    rx: mpsc::UnboundedReceiver<Snapshot<R>>,
    mirror: Weak<Mirror>,
}

impl<R: Mirrored> Subscription<R> {
    pub(crate) fn new(id: u64, rx: mpsc::UnboundedReceiver<Snapshot<R>>, mirror: Weak<Mirror>) -> Self {
        Self { id, rx, mirror }
    }

    /// Wait for the next snapshot; `None` once the repository is gone.
    pub async fn recv(&mut self) -> Option<Snapshot<R>> {
        self.rx.recv().await
    }

    /// Take the next queued snapshot without waiting.
    pub fn try_recv(&mut self) -> Option<Snapshot<R>> {
        match self.rx.try_recv() {
            Ok(snapshot) => Some(snapshot),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Drain queued snapshots and return the newest, if any.
    pub fn latest(&mut self) -> Option<Snapshot<R>> {
        let mut newest = None;
        while let Some(snapshot) = self.try_recv() {
            newest = Some(snapshot);
        }
        newest
    }

    /// Unregister now instead of at drop.
    pub fn close(self) {}
}

impl<R: Mirrored> Drop for Subscription<R> {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(mirror) = self.mirror.upgrade() {
            mirror.live::<R>().unregister(self.id);
        }
    }
}

impl<R: Mirrored> Stream for Subscription<R> {
    type Item = Snapshot<R>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
