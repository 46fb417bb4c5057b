//! Process-local single-flight table (§4.8 miss path). Grounded on the same
//! leader/waiter broadcast-channel shape used elsewhere in this codebase for
//! request coalescing, scoped here to `Arc<CacheEntry>` results.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::entry::CacheEntry;

pub(crate) type FetchResult = Result<Arc<CacheEntry>, String>;

pub(crate) struct InFlightTable {
    requests: Mutex<HashMap<String, broadcast::Sender<FetchResult>>>,
}

impl InFlightTable {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Attempts to become the leader fetcher for `key`. `None` means this
    /// caller is the leader; `Some(receiver)` means another fetch is
    /// already in flight and the caller should wait on it instead.
    pub fn try_join(&self, key: &str) -> Option<broadcast::Receiver<FetchResult>> {
        let mut requests = self.requests.lock().unwrap();
        if let Some(sender) = requests.get(key) {
            Some(sender.subscribe())
        } else {
            let (tx, _rx) = broadcast::channel(1);
            requests.insert(key.to_string(), tx);
            None
        }
    }

    pub fn complete(&self, key: &str, result: FetchResult) {
        let mut requests = self.requests.lock().unwrap();
        if let Some(sender) = requests.remove(key) {
            let _ = sender.send(result);
        }
    }

    pub fn cancel(&self, key: &str) {
        self.requests.lock().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_joiner_receives_the_leaders_result() {
        let table = InFlightTable::new();
        assert!(table.try_join("k").is_none());
        let mut waiter = table.try_join("k").expect("second caller should join as a waiter");

        let entry = Arc::new(CacheEntry::new(200, vec![], b"ok".to_vec(), 300, 60, String::new()));
        table.complete("k", Ok(entry.clone()));

        let received = waiter.recv().await.unwrap().unwrap();
        assert_eq!(received.body, entry.body);
    }

    #[test]
    fn cancel_clears_the_leader_slot_without_completing_waiters() {
        let table = InFlightTable::new();
        assert!(table.try_join("k").is_none());
        table.cancel("k");
        assert!(table.try_join("k").is_none());
    }
}
