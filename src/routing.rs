//! Routing state: the finger table, successor list, and predecessor link,
//! plus the invariants relating them (spec.md §4.4).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;

use crate::link::RemoteLink;
use crate::ring::{in_range, K, M};

pub struct RoutingState {
    pub fingers: RwLock<Vec<RemoteLink>>,
    pub succ_list: RwLock<[Option<String>; K]>,
    pub predecessor: RwLock<Option<RemoteLink>>,
    /// Cursor into `1..M` advanced by fix-fingers; index 0 belongs to
    /// stabilize. Starts at 1 rather than 0 so the very first fix-fingers
    /// tick doesn't duplicate stabilize's work (see DESIGN.md).
    fix_finger_cursor: AtomicUsize,
}

impl RoutingState {
    pub fn new(dial_timeout: Duration, call_timeout: Duration) -> Self {
        let fingers = (0..M)
            .map(|_| RemoteLink::new(dial_timeout, call_timeout))
            .collect();
        RoutingState {
            fingers: RwLock::new(fingers),
            succ_list: RwLock::new(Default::default()),
            predecessor: RwLock::new(None),
            fix_finger_cursor: AtomicUsize::new(1),
        }
    }

    /// Index fix-fingers should refresh this tick, then advances the
    /// cursor for next time. Wraps M-1 -> 1, never touching 0.
    pub fn next_fix_finger_index(&self) -> usize {
        let current = self.fix_finger_cursor.load(Ordering::SeqCst);
        let next = if current + 1 >= M { 1 } else { current + 1 };
        self.fix_finger_cursor.store(next, Ordering::SeqCst);
        current
    }

    /// Scans the finger table high to low, skipping disconnected entries,
    /// probing each live candidate with Ping (closing it on failure), and
    /// returning the first whose id lies strictly inside `(own_id,
    /// target_id)` on the ring.
    ///
    /// Unlike the source this never holds the fingers lock across the
    /// outbound Ping: a read-locked snapshot is taken first, and the write
    /// lock is only retaken briefly to close a slot that failed its probe
    /// (spec.md §5: "No lock is held across an outbound RPC to a peer
    /// except for short close/replace sequences on the fingers lock").
    pub async fn closest_preceding_finger(
        &self,
        own_id: u32,
        target_id: u32,
    ) -> Option<(usize, String, u32)> {
        let candidates: Vec<(usize, RemoteLink)> = {
            let guard = self.fingers.read().await;
            guard
                .iter()
                .enumerate()
                .rev()
                .filter(|(_, f)| f.is_connected())
                .map(|(i, f)| (i, f.clone()))
                .collect()
        };

        for (idx, mut probe) in candidates {
            if probe.ping().await.is_err() {
                self.fingers.write().await[idx].close();
                continue;
            }
            let id = match probe.id() {
                Some(id) => id,
                None => continue,
            };
            let addr = match probe.address() {
                Some(addr) => addr.to_string(),
                None => continue,
            };
            if in_range(own_id, target_id, id) {
                return Some((idx, addr, id));
            }
        }
        None
    }

    /// Snapshot of the K successor-list slots, empty string for unfilled
    /// ones (the wire representation spec.md §6 uses).
    pub async fn succ_list_snapshot(&self) -> Vec<String> {
        self.succ_list
            .read()
            .await
            .iter()
            .map(|slot| slot.clone().unwrap_or_default())
            .collect()
    }

    /// Rebuilds the successor list as `[succ_addr, their[0], their[1], ...,
    /// their[K-2]]`, stopping at the first empty incoming slot and leaving
    /// the remaining tail of our own list untouched beyond that point —
    /// matching the source's truncate-on-first-empty behavior rather than
    /// clearing the tail outright, so stale-but-still-useful fallback
    /// addresses survive a momentarily short list from the successor.
    pub async fn rebuild_succ_list(&self, succ_addr: String, their_list: &[String]) {
        let mut guard = self.succ_list.write().await;
        guard[0] = Some(succ_addr);
        for i in 1..K {
            match their_list.get(i - 1) {
                Some(addr) if !addr.is_empty() => guard[i] = Some(addr.clone()),
                _ => break,
            }
        }
    }

    pub async fn set_succ_list_head(&self, addr: Option<String>) {
        self.succ_list.write().await[0] = addr;
    }

    pub async fn succ_list_head(&self) -> Option<String> {
        self.succ_list.read().await[0].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fix_finger_cursor_wraps_without_touching_zero() {
        let routing = RoutingState::new(Duration::from_secs(1), Duration::from_secs(1));
        let mut seen = Vec::new();
        for _ in 0..(M + 2) {
            seen.push(routing.next_fix_finger_index());
        }
        assert!(seen.iter().all(|&i| i != 0));
        assert!(seen.contains(&1));
        assert!(seen.contains(&(M - 1)));
    }

    #[tokio::test]
    async fn rebuild_succ_list_truncates_at_first_empty() {
        let routing = RoutingState::new(Duration::from_secs(1), Duration::from_secs(1));
        routing
            .rebuild_succ_list(
                "succ".into(),
                &["a".into(), "b".into(), "".into(), "d".into()],
            )
            .await;
        let snap = routing.succ_list_snapshot().await;
        assert_eq!(snap[0], "succ");
        assert_eq!(snap[1], "a");
        assert_eq!(snap[2], "b");
        assert_eq!(snap[3], "");
        assert_eq!(snap[4], "");
    }
}
