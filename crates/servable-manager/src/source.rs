//! Version streams feeding the scheduler.
//!
//! Discovery (directory polling, a config push, a test harness) produces a
//! sequence of [`VersionEvent`]s. A `Some` loader aspires its id; `None`
//! withdraws a previously aspired id.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use servable_core::{Loader, ServableId};

/// One change to the aspired set.
pub struct VersionEvent {
    pub id: ServableId,
    pub loader: Option<Box<dyn Loader>>,
}

impl VersionEvent {
    /// Aspire `id`, loading it with `loader`.
    #[must_use]
    pub fn aspire(id: ServableId, loader: Box<dyn Loader>) -> Self {
        Self {
            id,
            loader: Some(loader),
        }
    }

    /// Stop aspiring `id`.
    #[must_use]
    pub fn withdraw(id: ServableId) -> Self {
        Self { id, loader: None }
    }

    #[must_use]
    pub fn is_withdrawal(&self) -> bool {
        self.loader.is_none()
    }
}

impl fmt::Debug for VersionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionEvent")
            .field("id", &self.id)
            .field("has_loader", &self.loader.is_some())
            .finish()
    }
}

/// A stream of aspired-version changes.
#[async_trait]
pub trait VersionSource: Send {
    /// Next event, or `None` once the source is exhausted.
    async fn next_event(&mut self) -> Option<VersionEvent>;
}

/// [`VersionSource`] fed through a tokio channel.
#[derive(Debug)]
pub struct ChannelVersionSource {
    rx: mpsc::Receiver<VersionEvent>,
}

impl ChannelVersionSource {
    /// Create a source and the sender that feeds it.
    #[must_use]
    pub fn channel(buffer: usize) -> (mpsc::Sender<VersionEvent>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl VersionSource for ChannelVersionSource {
    async fn next_event(&mut self) -> Option<VersionEvent> {
        self.rx.recv().await
    }
}
