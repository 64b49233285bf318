// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Change notifications: a bounded fan-out so a web or monitoring surface
//! can react to datastore mutations without polling it. The engine fires
//! one notification per serviced request that touched the datastore; a
//! lagging subscriber misses ticks rather than blocking the engine.

use tokio::sync::broadcast;

/// A single, content-free tick meaning "the datastore changed".
#[derive(Debug, Clone, Copy)]
pub struct Changed;

/// Cloneable handle shared by the engine and anything that wants to react
/// to datastore mutations.
#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Changed>,
}

impl Notifier {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Registers a new subscriber; it only sees notifications fired after
    /// this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Changed> {
        self.sender.subscribe()
    }

    /// Fires a change tick. A send with no subscribers is not an error.
    pub fn notify(&self) {
        let _ = self.sender.send(Changed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_observes_notification() {
        let notifier = Notifier::new(8);
        let mut rx = notifier.subscribe();
        notifier.notify();
        rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn notify_with_no_subscribers_does_not_panic() {
        let notifier = Notifier::new(8);
        notifier.notify();
    }
}
