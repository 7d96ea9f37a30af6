//! Per-identity ordering of routing jobs.
//!
//! Jobs of one identity form a chain: each waits for the one submitted
//! before it to finish (or be dropped) before routing. Jobs of different
//! identities do not wait on each other.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::domain::ConversationId;

#[derive(Default)]
pub struct Lanes {
    tails: Mutex<HashMap<ConversationId, oneshot::Receiver<()>>>,
}

/// A job's place in its identity's chain. Dropping it lets the next job of
/// the same identity run.
pub struct Turn {
    prev: Option<oneshot::Receiver<()>>,
    _done: oneshot::Sender<()>,
}

impl Turn {
    /// Wait until the previous job of this identity is gone.
    pub async fn wait(&mut self) {
        if let Some(prev) = self.prev.as_mut() {
            // Closed means the previous job finished, panicked or was dropped.
            let _ = prev.await;
            self.prev = None;
        }
    }
}

impl Lanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next turn for `id`. Must be called in submission order.
    pub fn enqueue(&self, id: ConversationId) -> Turn {
        let (tx, rx) = oneshot::channel();
        let prev = self
            .tails
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, rx);
        Turn { prev, _done: tx }
    }

    /// Forget identities whose last job is already gone.
    pub fn prune(&self) {
        self.tails
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, rx| matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn second_turn_waits_for_the_first() {
        let lanes = Lanes::new();
        let first = lanes.enqueue(ConversationId(1));
        let mut second = lanes.enqueue(ConversationId(1));

        assert!(timeout(Duration::from_millis(20), second.wait())
            .await
            .is_err());

        drop(first);
        timeout(Duration::from_secs(1), second.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn identities_do_not_block_each_other() {
        let lanes = Lanes::new();
        let _held = lanes.enqueue(ConversationId(1));
        let mut other = lanes.enqueue(ConversationId(2));
        timeout(Duration::from_secs(1), other.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn prune_drops_finished_chains_only() {
        let lanes = Lanes::new();
        let done = lanes.enqueue(ConversationId(1));
        let _running = lanes.enqueue(ConversationId(2));
        drop(done);

        lanes.prune();
        assert_eq!(lanes.tails.lock().unwrap().len(), 1);

        // A fresh turn after pruning does not wait on anything.
        let mut fresh = lanes.enqueue(ConversationId(1));
        timeout(Duration::from_secs(1), fresh.wait()).await.unwrap();
    }
}
