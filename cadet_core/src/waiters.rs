use crate::models::{Category, Version};
use crate::store::Snapshot;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

/// What a refresh waiter receives once its entity is written.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub version: Version,
    pub record: Value,
}

/// What a long-poll waiter receives on release.
#[derive(Debug, Clone)]
pub struct PollDelivery {
    pub version: Version,
    pub snapshot: Arc<Snapshot>,
}

type WaitKey = (Category, String);

/// Pending callers keyed by the (category, key) they asked to see refreshed.
///
/// Each waiter is the sending half of a oneshot channel. A caller that goes
/// away drops its receiver; the closed sender is then pruned instead of
/// being delivered to.
#[derive(Debug, Default)]
pub struct RefreshWaiterRegistry {
    waiting: HashMap<WaitKey, Vec<oneshot::Sender<Delivery>>>,
}

impl RefreshWaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn enqueue(&mut self, category: Category, key: &str) -> oneshot::Receiver<Delivery> {
        let (tx, rx) = oneshot::channel();
        let list = self.waiting.entry((category, key.to_string())).or_default();
        list.retain(|w| !w.is_closed());
        list.push(tx);
        rx
    }

    /// Detach every waiter for (category, key) and hand each the record.
    ///
    /// Returns how many waiters were still listening. Resolving a key nobody
    /// waits on is a no-op.
    pub fn resolve(
        &mut self,
        category: Category,
        key: &str,
        record: &Value,
        version: Version,
    ) -> usize {
        let Some(waiters) = self.waiting.remove(&(category, key.to_string())) else {
            return 0;
        };

        let mut delivered = 0;
        for tx in waiters {
            let delivery = Delivery {
                version,
                record: record.clone(),
            };
            if tx.send(delivery).is_ok() {
                delivered += 1;
            }
        }
        tracing::debug!(%category, key, %version, delivered, "sent refreshed data");
        delivered
    }

    /// Drop waiters whose caller has gone away. Returns the number removed.
    pub fn prune(&mut self) -> usize {
        let mut removed = 0;
        self.waiting.retain(|_, list| {
            let before = list.len();
            list.retain(|w| !w.is_closed());
            removed += before - list.len();
            !list.is_empty()
        });
        removed
    }

    pub fn pending(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }

    pub fn pending_for(&self, category: Category, key: &str) -> usize {
        self.waiting
            .get(&(category, key.to_string()))
            .map(Vec::len)
            .unwrap_or(0)
    }
}

/// Callers waiting for the next change of anything at all.
#[derive(Debug, Default)]
pub struct PollWaiterRegistry {
    waiting: Vec<oneshot::Sender<PollDelivery>>,
}

impl PollWaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self) -> oneshot::Receiver<PollDelivery> {
        let (tx, rx) = oneshot::channel();
        self.waiting.push(tx);
        rx
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.waiting.len()
    }

    /// Detach the whole list and hand every waiter the same snapshot.
    pub fn release_all(&mut self, snapshot: Arc<Snapshot>) -> usize {
        let waiters = std::mem::take(&mut self.waiting);
        let version = snapshot.version;
        waiters
            .into_iter()
            .filter(|tx| !tx.is_closed())
            .map(|tx| {
                tx.send(PollDelivery {
                    version,
                    snapshot: snapshot.clone(),
                })
            })
            .filter(Result::is_ok)
            .count()
    }

    pub fn prune(&mut self) -> usize {
        let before = self.waiting.len();
        self.waiting.retain(|w| !w.is_closed());
        before - self.waiting.len()
    }
}
