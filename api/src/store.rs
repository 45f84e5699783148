use sentinel_vision::BroadcastResult;
use std::sync::Arc;
use tokio::sync::watch;

/// A result as it sits in the store, tagged with its publish sequence.
#[derive(Debug)]
pub struct Published {
    pub seq: u64,
    pub result: BroadcastResult,
}

/// Single-slot, last-write-wins holder of the newest result.
///
/// Values are swapped in whole behind an `Arc`, so a reader holds either the
/// previous or the new result and never a mix of the two.
#[derive(Clone)]
pub struct LatestResultStore {
    tx: Arc<watch::Sender<Option<Arc<Published>>>>,
}

impl LatestResultStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the current result. Returns the sequence assigned to it.
    pub fn publish(&self, result: BroadcastResult) -> u64 {
        let mut seq = 0;
        self.tx.send_modify(|current| {
            seq = current.as_ref().map_or(0, |p| p.seq) + 1;
            *current = Some(Arc::new(Published { seq, result }));
        });
        seq
    }

    pub fn snapshot(&self) -> Option<Arc<Published>> {
        self.tx.borrow().clone()
    }

    /// Sequence of the current result, 0 before the first publish.
    pub fn current_seq(&self) -> u64 {
        self.tx.borrow().as_ref().map_or(0, |p| p.seq)
    }
}

impl Default for LatestResultStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_vision::FrameStatus;

    /// Every field encodes `id`, so a torn read would show up as a mismatch.
    fn result(id: u64) -> BroadcastResult {
        BroadcastResult {
            encoded_image: id.to_le_bytes().to_vec(),
            detections: Vec::new(),
            status: if id % 2 == 0 { FrameStatus::Ok } else { FrameStatus::Intrusion },
            captured_at_ms: id as i64,
            frame_seq: id,
        }
    }

    #[test]
    fn empty_until_first_publish() {
        let store = LatestResultStore::new();
        assert!(store.snapshot().is_none());
        assert_eq!(store.current_seq(), 0);
    }

    #[test]
    fn publish_replaces_and_numbers() {
        let store = LatestResultStore::new();
        assert_eq!(store.publish(result(10)), 1);
        assert_eq!(store.publish(result(11)), 2);

        let current = store.snapshot().unwrap();
        assert_eq!(current.seq, 2);
        assert_eq!(current.result.frame_seq, 11);
        assert_eq!(store.current_seq(), 2);
    }

    #[test]
    fn held_snapshot_is_unaffected_by_later_publish() {
        let store = LatestResultStore::new();
        store.publish(result(1));
        let held = store.snapshot().unwrap();
        store.publish(result(2));
        assert_eq!(held.result.frame_seq, 1);
        assert_eq!(store.snapshot().unwrap().result.frame_seq, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_snapshots_never_tear() {
        let store = LatestResultStore::new();
        let writer = {
            let store = store.clone();
            tokio::task::spawn_blocking(move || {
                for id in 0..5_000u64 {
                    store.publish(result(id));
                }
            })
        };

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let store = store.clone();
                tokio::task::spawn_blocking(move || {
                    let mut last_seq = 0;
                    for _ in 0..5_000 {
                        let Some(p) = store.snapshot() else { continue };
                        let id = p.result.frame_seq;
                        assert_eq!(p.result.encoded_image, id.to_le_bytes().to_vec());
                        assert_eq!(p.result.captured_at_ms, id as i64);
                        assert_eq!(p.seq, id + 1);
                        assert!(p.seq >= last_seq, "went back from {last_seq} to {}", p.seq);
                        last_seq = p.seq;
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(store.current_seq(), 5_000);
    }
}
