//! One-shot event listeners.
//!
//! A command that must answer only after the node confirms something (a
//! radio stream actually starting) registers a [`Listener`] here and waits
//! on it.  The core dispatches node events by key; a listener gets the first
//! matching event, or nothing once cancelled or expired.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use voice_proto::protocol::GuildId;

/// What a listener waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenKind {
    TrackStarted,
}

pub type ListenKey = (GuildId, ListenKind);

struct Entry<E> {
    tx: oneshot::Sender<E>,
    token: CancellationToken,
}

pub struct ListenerRegistry<K, E> {
    entries: Mutex<HashMap<K, Vec<Entry<E>>>>,
}

impl<K, E> Default for ListenerRegistry<K, E> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, E> ListenerRegistry<K, E>
where
    K: Eq + Hash,
    E: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the next event for `key`.  With an expiry the
    /// listener gives up on its own after that long.
    pub fn listen(&self, key: K, expiry: Option<Duration>) -> Listener<E> {
        let (tx, rx) = oneshot::channel();
        let token = CancellationToken::new();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let slot = entries.entry(key).or_default();
        slot.retain(|e| !e.tx.is_closed() && !e.token.is_cancelled());
        slot.push(Entry {
            tx,
            token: token.clone(),
        });
        Listener {
            rx,
            token,
            deadline: expiry.map(|d| Instant::now() + d),
        }
    }

    /// Hand `event` to every live listener on `key`.  Returns how many got it.
    pub fn dispatch(&self, key: &K, event: E) -> usize {
        let waiting = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.remove(key).unwrap_or_default()
        };
        waiting
            .into_iter()
            .filter(|e| !e.token.is_cancelled())
            .filter_map(|e| e.tx.send(event.clone()).ok())
            .count()
    }

    /// Number of registered entries, including ones nobody waits on anymore.
    pub fn pending(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(Vec::len)
            .sum()
    }
}

pub struct Listener<E> {
    rx: oneshot::Receiver<E>,
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl<E> Listener<E> {
    /// Token that cancels this listener from elsewhere.
    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for the event.  `None` on cancel, expiry, or a dropped registry.
    pub async fn recv(self) -> Option<E> {
        let Listener {
            rx,
            token,
            deadline,
        } = self;
        let expired = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = token.cancelled() => None,
            _ = expired => None,
            event = rx => event.ok(),
        }
    }
}
