//! The running Chord node: lifecycle (Create/Join/Quit/ForceQuit), the
//! client-facing Put/Get/Delete operations, the RPC-handler bodies invoked
//! by peers, and the three periodic maintenance tasks.
//!
//! Every method here is transport-agnostic — the gRPC glue in [`crate::rpc`]
//! only unwraps requests and maps errors onto [`tonic::Status`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::oneshot;

use crate::config::ChordConfig;
use crate::error::ChordError;
use crate::link::RemoteLink;
use crate::ring::{hash, in_range, TTL};
use crate::routing::RoutingState;
use crate::storage::KvMap;

pub struct ChordNode {
    addr: String,
    id: u32,
    online: AtomicBool,
    primary: KvMap,
    backup: KvMap,
    routing: RoutingState,
    config: ChordConfig,
    shutdown_tx: StdMutex<Option<oneshot::Sender<()>>>,
}

impl ChordNode {
    pub fn new(addr: String, config: ChordConfig) -> Self {
        let id = hash(&addr);
        ChordNode {
            routing: RoutingState::new(config.dial_timeout, config.call_timeout),
            id,
            addr,
            online: AtomicBool::new(false),
            primary: KvMap::new(),
            backup: KvMap::new(),
            config,
            shutdown_tx: StdMutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Registers the oneshot that stops the gRPC listener. Called once by
    /// the binary before it starts serving.
    pub fn set_shutdown_sender(&self, tx: oneshot::Sender<()>) {
        *self.shutdown_tx.lock().unwrap() = Some(tx);
    }

    fn new_link(&self) -> RemoteLink {
        RemoteLink::new(self.config.dial_timeout, self.config.call_timeout)
    }

    async fn shutdown_listener(&self) {
        let tx = self.shutdown_tx.lock().unwrap().take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
    }

    async fn close_all_links(&self) {
        let mut fingers = self.routing.fingers.write().await;
        for finger in fingers.iter_mut() {
            finger.close();
        }
        drop(fingers);
        if let Some(mut pred) = self.routing.predecessor.write().await.take() {
            pred.close();
        }
    }

    async fn reset_state(&self) {
        self.primary.replace(HashMap::new()).await;
        self.backup.replace(HashMap::new()).await;
        let mut succ_list = self.routing.succ_list.write().await;
        for slot in succ_list.iter_mut() {
            *slot = None;
        }
    }

    // ---- ring membership -------------------------------------------------

    /// Creates a new ring: self-loop on finger[0], successor[0] and
    /// predecessor (spec.md §3 "Lifecycle").
    pub async fn create(self: &Arc<Self>) {
        self.routing
            .set_succ_list_head(Some(self.addr.clone()))
            .await;
        {
            let mut fingers = self.routing.fingers.write().await;
            let _ = fingers[0].dial(&self.addr).await;
        }
        {
            let mut link = self.new_link();
            let _ = link.dial(&self.addr).await;
            *self.routing.predecessor.write().await = Some(link);
        }
        log::info!("{}, {} Create new network", self.addr, self.id);
        self.online.store(true, Ordering::SeqCst);
        self.run_maintenance();
    }

    /// Joins an existing ring via `bootstrap_addr`. Returns `Err` on dial
    /// failure, routing failure, or an id collision with the would-be
    /// successor (spec.md §8 scenario 5).
    pub async fn join(self: &Arc<Self>, bootstrap_addr: &str) -> Result<(), ChordError> {
        log::info!("{}, {} Join {} ...", self.addr, self.id, bootstrap_addr);

        let mut bootstrap = self.new_link();
        if let Err(e) = bootstrap.dial(bootstrap_addr).await {
            log::error!("{} Join: failed to dial {}: {}", self.addr, bootstrap_addr, e);
            return Err(e);
        }

        let succ_addr = match bootstrap.find_successor(self.id, TTL).await {
            Ok(addr) => addr,
            Err(e) => {
                bootstrap.close();
                log::error!("{} Join: failed in FindSuccessor: {}", self.addr, e);
                return Err(e);
            }
        };
        bootstrap.close();

        let mut succ_link = self.new_link();
        if let Err(e) = succ_link.dial(&succ_addr).await {
            log::error!("{} Join: failed to dial successor {}: {}", self.addr, succ_addr, e);
            return Err(e);
        }

        if succ_link.id() == Some(self.id) {
            log::error!(
                "{} Join: conflict id with {}, {}",
                self.addr,
                succ_link.address().unwrap_or(""),
                self.id
            );
            let addr = succ_link.address().unwrap_or("").to_string();
            succ_link.close();
            return Err(ChordError::IdCollision(addr));
        }

        let their_list = match succ_link.get_succ_list().await {
            Ok(list) => list,
            Err(e) => {
                log::error!("{} Join: get succList failed: {}", self.addr, e);
                succ_link.close();
                return Err(e);
            }
        };
        self.routing
            .rebuild_succ_list(succ_addr.clone(), &their_list)
            .await;

        let data = match succ_link.get_all_data(false).await {
            Ok(data) => data,
            Err(e) => {
                log::error!("{} Join: failed to get data from successor: {}", self.addr, e);
                succ_link.close();
                return Err(e);
            }
        };
        let succ_id = succ_link.id().unwrap_or(hash(&succ_addr));
        for (k, v) in data {
            if in_range(succ_id.wrapping_add(1), self.id.wrapping_add(1), hash(&k)) {
                self.primary.put(k, v).await;
            }
        }

        {
            let mut fingers = self.routing.fingers.write().await;
            fingers[0].close();
            fingers[0] = succ_link;
        }

        self.online.store(true, Ordering::SeqCst);
        self.run_maintenance();
        Ok(())
    }

    /// Orderly departure (spec.md §4.11): hand off predecessor + data to
    /// the successor, inform the predecessor of the new successor, then
    /// stop accepting RPCs and reset local state.
    pub async fn quit(self: &Arc<Self>) {
        if !self.online.swap(false, Ordering::SeqCst) {
            return;
        }
        log::info!("{} start Quit", self.addr);

        match self.get_online_succ().await {
            Some(mut succ) => {
                let succ_addr = succ.address().unwrap_or("").to_string();
                if succ_addr != self.addr {
                    let pred_addr = {
                        let guard = self.routing.predecessor.read().await;
                        guard
                            .as_ref()
                            .and_then(|p| p.address().map(str::to_string))
                            .unwrap_or_default()
                    };
                    let snapshot = self.primary.snapshot().await;
                    if let Err(e) = succ
                        .succ_inform_exit(&self.addr, &pred_addr, snapshot)
                        .await
                    {
                        log::error!("{} Quit: SuccInformExit failed: {}", self.addr, e);
                    }

                    let pred_to_notify = {
                        let guard = self.routing.predecessor.read().await;
                        match guard.as_ref() {
                            Some(p) if p.is_connected() && p.address() != Some(self.addr.as_str()) => {
                                p.address().map(str::to_string)
                            }
                            _ => None,
                        }
                    };
                    if let Some(pred_addr) = pred_to_notify {
                        let mut pred_link = self.new_link();
                        if pred_link.dial(&pred_addr).await.is_ok() {
                            if let Err(e) = pred_link.pred_inform_exit(&self.addr, &succ_addr).await
                            {
                                log::error!("{} Quit: PredInformExit failed: {}", self.addr, e);
                            }
                            pred_link.close();
                        }
                    }
                }
                succ.close();
            }
            None => log::error!("{} Quit: failed to get online successor", self.addr),
        }

        self.shutdown_listener().await;
        self.close_all_links().await;
        self.reset_state().await;
    }

    /// Abrupt departure: no handoff, indistinguishable to peers from a
    /// crash (spec.md §4.12).
    pub async fn force_quit(self: &Arc<Self>) {
        if !self.online.swap(false, Ordering::SeqCst) {
            return;
        }
        log::warn!("{} start ForceQuit", self.addr);
        self.shutdown_listener().await;
        self.close_all_links().await;
        self.reset_state().await;
    }

    fn run_maintenance(self: &Arc<Self>) {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            while node.online.load(Ordering::SeqCst) {
                node.stabilize().await;
                tokio::time::sleep(node.config.stabilize_interval).await;
            }
        });
        let node = Arc::clone(self);
        tokio::spawn(async move {
            while node.online.load(Ordering::SeqCst) {
                node.fix_fingers().await;
                tokio::time::sleep(node.config.fix_fingers_interval).await;
            }
        });
        let node = Arc::clone(self);
        tokio::spawn(async move {
            while node.online.load(Ordering::SeqCst) {
                node.fix_predecessor().await;
                tokio::time::sleep(node.config.fix_predecessor_interval).await;
            }
        });
    }

    // ---- routing -----------------------------------------------------

    /// FindSuccessor (spec.md §4.5). `ttl` is decremented on each hop and
    /// bounds worst-case routing under inconsistent fingers.
    pub async fn find_successor(&self, target_id: u32, ttl: i16) -> Result<String, ChordError> {
        let mut succ = self
            .get_online_succ()
            .await
            .ok_or(ChordError::NoOnlineSuccessor)?;
        let succ_id = succ.id().expect("dialed link carries an id");
        let succ_addr = succ
            .address()
            .expect("dialed link carries an address")
            .to_string();

        if in_range(self.id.wrapping_add(1), succ_id.wrapping_add(1), target_id) {
            succ.close();
            return Ok(succ_addr);
        }
        if ttl == 1 {
            succ.close();
            return Err(ChordError::TtlExpired);
        }

        let finger = self
            .routing
            .closest_preceding_finger(self.id, target_id)
            .await;
        let delegate_addr = match &finger {
            Some((_, addr, _)) if addr != &self.addr => Some(addr.clone()),
            _ => None,
        };

        if let Some(addr) = delegate_addr {
            let mut link = self.new_link();
            if link.dial(&addr).await.is_ok() {
                succ.close();
                let result = link.find_successor(target_id, ttl - 1).await;
                link.close();
                return result;
            }
            log::warn!(
                "{} FindSuccessor: closest preceding finger {} unreachable, falling back to successor",
                self.addr,
                addr
            );
        }

        let result = succ.find_successor(target_id, ttl - 1).await;
        succ.close();
        result
    }

    pub async fn get_predecessor_addr(&self) -> Result<String, ChordError> {
        let guard = self.routing.predecessor.read().await;
        match guard.as_ref() {
            Some(link) if link.is_connected() => Ok(link.address().unwrap().to_string()),
            _ => Err(ChordError::NoImmediatePredecessor),
        }
    }

    pub async fn succ_list_snapshot(&self) -> Vec<String> {
        self.routing.succ_list_snapshot().await
    }

    /// Online successor selection (spec.md §4.6): walks the successor list
    /// and returns the first address that successfully dials. The returned
    /// link is owned by the caller, who must close it after use.
    pub async fn get_online_succ(&self) -> Option<RemoteLink> {
        for addr in self.routing.succ_list_snapshot().await {
            if addr.is_empty() {
                continue;
            }
            let mut link = self.new_link();
            if link.dial(&addr).await.is_ok() {
                return Some(link);
            }
            log::warn!("{} getOnlineSucc: failed to connect to {}", self.addr, addr);
        }
        None
    }

    // ---- maintenance tasks ---------------------------------------------

    /// Stabilize (spec.md §4.7), run every `stabilize_interval`.
    async fn stabilize(&self) {
        let mut succ = match self.get_online_succ().await {
            Some(s) => s,
            None => {
                log::warn!("{} stabilize: no online successor", self.addr);
                return;
            }
        };
        let mut succ_id = succ.id().expect("dialed link carries an id");

        let possible_pred_addr = match succ.get_predecessor().await {
            Ok(addr) => addr,
            Err(ChordError::NoImmediatePredecessor) => {
                succ.address().unwrap_or(&self.addr).to_string()
            }
            Err(e) => {
                log::error!("{} stabilize: failed to get possible succ: {}", self.addr, e);
                succ.close();
                return;
            }
        };
        let possible_pred_id = hash(&possible_pred_addr);

        if in_range(self.id.wrapping_add(1), succ_id, possible_pred_id) {
            log::info!(
                "{} stabilize: closer succ {} ({})",
                self.addr,
                possible_pred_addr,
                possible_pred_id
            );
            succ.close();
            let mut closer = self.new_link();
            if let Err(e) = closer.dial(&possible_pred_addr).await {
                log::error!("{} stabilize: succ dial error: {}", self.addr, e);
                return;
            }
            succ = closer;
            succ_id = possible_pred_id;
        }

        if succ.address() == Some(self.addr.as_str()) {
            log::info!("{} stabilize: succ is self", self.addr);
            succ.close();
            return;
        }

        if let Err(e) = succ.notify(&self.addr).await {
            log::error!("{} stabilize: notify failed: {}", self.addr, e);
        }

        let their_list = match succ.get_succ_list().await {
            Ok(list) => list,
            Err(e) => {
                log::error!("{} stabilize: get succList failed: {}", self.addr, e);
                succ.close();
                return;
            }
        };
        let succ_addr = succ.address().unwrap().to_string();

        {
            let mut fingers = self.routing.fingers.write().await;
            if fingers[0].id() == Some(succ_id) {
                succ.close();
            } else {
                fingers[0].close();
                fingers[0] = succ;
            }
        }
        self.routing.rebuild_succ_list(succ_addr, &their_list).await;
    }

    /// Fix-fingers (spec.md §4.4/§4.9), run every `fix_fingers_interval`.
    /// Index 0 is maintained by stabilize; this only touches `1..M`.
    async fn fix_fingers(&self) {
        let index = self.routing.next_fix_finger_index();
        let start_id = self.id.wrapping_add(1u32.wrapping_shl(index as u32));

        match self.find_successor(start_id, TTL).await {
            Ok(addr) => {
                let mut fingers = self.routing.fingers.write().await;
                if fingers[index].address() != Some(addr.as_str()) {
                    fingers[index].close();
                    if let Err(e) = fingers[index].dial(&addr).await {
                        log::error!("{} fixFingers: failed to dial {}: {}", self.addr, addr, e);
                    }
                }
            }
            Err(e) => log::error!(
                "{} fixFingers: failed to find successor of {}: {}",
                self.addr,
                start_id,
                e
            ),
        }
    }

    /// Fix-predecessor (spec.md §4.9), run every `fix_predecessor_interval`.
    /// Never holds the predecessor lock across the outbound SendBackupData
    /// call (spec.md's open-question fix to the source's lock discipline).
    async fn fix_predecessor(&self) {
        let mut probe = {
            let guard = self.routing.predecessor.read().await;
            match guard.as_ref() {
                Some(p) if p.is_connected() => p.clone(),
                _ => return,
            }
        };

        if probe.ping().await.is_ok() {
            log::debug!("{} fixPredecessor: {} OK", self.addr, probe.address().unwrap_or(""));
            return;
        }

        log::warn!("{} fixPredecessor: predecessor disconnected", self.addr);
        let backup_snapshot = self.backup.snapshot().await;
        self.primary.merge_from(backup_snapshot.clone()).await;

        if let Some(mut succ) = self.get_online_succ().await {
            if let Err(e) = succ.send_backup_data(backup_snapshot).await {
                log::error!("{} fixPredecessor: failed to send backup data: {}", self.addr, e);
            }
            succ.close();
        }

        if let Some(mut old) = self.routing.predecessor.write().await.take() {
            old.close();
        }
    }

    async fn fetch_backup_data(&self) {
        let mut probe = {
            let guard = self.routing.predecessor.read().await;
            match guard.as_ref() {
                Some(p) if p.is_connected() => p.clone(),
                _ => {
                    log::warn!("{} fetchBackupData: predecessor not connected", self.addr);
                    return;
                }
            }
        };
        match probe.get_all_data(false).await {
            Ok(data) => self.backup.replace(data).await,
            Err(e) => log::error!("{} fetchBackupData: {}", self.addr, e),
        }
    }

    // ---- RPC handler bodies ---------------------------------------------

    /// Notify handler (spec.md §4.8). Never holds the predecessor lock
    /// across the outbound dial (spec.md §5): the adoption check and the
    /// install are two short lock sections around an unlocked dial, the
    /// same pattern `fix_predecessor` uses for its own outbound RPC.
    pub async fn notify(self: &Arc<Self>, addr: String) {
        let id = hash(&addr);

        let should_adopt = |guard: &Option<RemoteLink>| match guard.as_ref() {
            Some(p) if p.is_connected() => in_range(p.id().unwrap().wrapping_add(1), self.id, id),
            _ => true,
        };

        if !should_adopt(&self.routing.predecessor.read().await) {
            return;
        }

        let mut new_link = self.new_link();
        if let Err(e) = new_link.dial(&addr).await {
            log::error!("{} Notify: dial error: {}", self.addr, e);
            return;
        }

        {
            let mut pred_guard = self.routing.predecessor.write().await;
            // Re-check: another Notify may have adopted a closer predecessor
            // while this one was dialing with the lock released.
            if !should_adopt(&pred_guard) {
                new_link.close();
                return;
            }
            log::info!("{} Notify: adopting new predecessor {}", self.addr, addr);
            if let Some(mut old) = pred_guard.take() {
                old.close();
            }
            *pred_guard = Some(new_link);
        }

        let node = Arc::clone(self);
        tokio::spawn(async move {
            node.fetch_backup_data().await;
        });

        let own_id = self.id;
        self.primary
            .retain_removing(|k| in_range(own_id.wrapping_add(1), id.wrapping_add(1), hash(k)))
            .await;
    }

    pub async fn get_all_data(&self, is_backup: bool) -> HashMap<String, String> {
        if is_backup {
            self.backup.snapshot().await
        } else {
            self.primary.snapshot().await
        }
    }

    pub async fn get_data_by_key(&self, key: &str) -> Result<String, ChordError> {
        self.primary
            .get(key)
            .await
            .ok_or_else(|| ChordError::UnknownKey(key.to_string()))
    }

    /// PutData (spec.md §4.10): a primary write acknowledges immediately
    /// and asynchronously replicates to the current online successor's
    /// backup map.
    pub async fn put_data(self: &Arc<Self>, key: String, value: String, is_backup: bool) {
        if is_backup {
            self.backup.put(key, value).await;
            return;
        }
        self.primary.put(key.clone(), value.clone()).await;
        let node = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(mut succ) = node.get_online_succ().await {
                if let Err(e) = succ.put_data(&key, &value, true).await {
                    log::error!("{} PutData: send succ backup KV: {}", node.addr, e);
                }
                succ.close();
            }
        });
    }

    /// DeleteData mirrors PutData (spec.md §4.10).
    pub async fn delete_data(self: &Arc<Self>, key: &str, is_backup: bool) {
        if is_backup {
            self.backup.delete(key).await;
            return;
        }
        self.primary.delete(key).await;
        let node = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            if let Some(mut succ) = node.get_online_succ().await {
                if let Err(e) = succ.delete_data(&key, true).await {
                    log::error!("{} DeleteData: delete succ backup KV: {}", node.addr, e);
                }
                succ.close();
            }
        });
    }

    pub async fn merge_backup_data(&self, data: HashMap<String, String>) {
        self.backup.merge_from(data).await;
    }

    /// SuccInformExit handler (spec.md §4.13). Guards against a missing
    /// online successor before pushing the handed-off data onward — the
    /// source dereferences it unconditionally (documented open question).
    pub async fn succ_inform_exit(
        self: &Arc<Self>,
        exiting_addr: String,
        exiting_pred_addr: String,
        data: HashMap<String, String>,
    ) {
        log::info!(
            "{} SuccInformExit: {} {}",
            self.addr,
            exiting_addr,
            exiting_pred_addr
        );

        let is_our_predecessor = {
            let guard = self.routing.predecessor.read().await;
            matches!(
                guard.as_ref(),
                Some(p) if p.is_connected() && p.address() == Some(exiting_addr.as_str())
            )
        };
        if !is_our_predecessor {
            return;
        }

        // Close the old predecessor link and dial its replacement without
        // holding the predecessor lock across the outbound dial (spec.md
        // §5), re-acquiring it only for the short close/install that
        // follows — the same pattern `fix_predecessor` uses.
        {
            let mut guard = self.routing.predecessor.write().await;
            if let Some(mut old) = guard.take() {
                old.close();
            }
        }

        let mut new_link = self.new_link();
        match new_link.dial(&exiting_pred_addr).await {
            Ok(()) => {
                let mut guard = self.routing.predecessor.write().await;
                if let Some(mut stale) = guard.take() {
                    stale.close();
                }
                *guard = Some(new_link);
            }
            Err(e) => {
                log::error!("{} SuccInformExit: dialing new predecessor failed: {}", self.addr, e);
            }
        }

        let node = Arc::clone(self);
        tokio::spawn(async move {
            node.fetch_backup_data().await;
        });

        self.primary.merge_from(data.clone()).await;

        let node = Arc::clone(self);
        tokio::spawn(async move {
            match node.get_online_succ().await {
                Some(mut succ) => {
                    if let Err(e) = succ.send_backup_data(data).await {
                        log::error!(
                            "{} SuccInformExit: failed to send backup data to {}: {}",
                            node.addr,
                            succ.address().unwrap_or(""),
                            e
                        );
                    }
                    succ.close();
                }
                None => log::warn!(
                    "{} SuccInformExit: no online successor to push backup data to",
                    node.addr
                ),
            }
        });
    }

    /// PredInformExit handler (spec.md §4.14).
    pub async fn pred_inform_exit(&self, exiting_addr: String, replacement_addr: String) {
        log::info!(
            "{} PredInformExit: {} {}",
            self.addr,
            exiting_addr,
            replacement_addr
        );
        let mut succ_list = self.routing.succ_list.write().await;
        if succ_list[0].as_deref() == Some(exiting_addr.as_str()) {
            succ_list[0] = Some(replacement_addr);
        }
    }

    // ---- client-facing operations ----------------------------------------

    pub async fn put(&self, key: &str, value: &str) -> bool {
        let target_id = hash(key);
        let target_addr = match self.find_successor(target_id, TTL).await {
            Ok(addr) => addr,
            Err(e) => {
                log::error!("{} Put: failed in FindSuccessor: {}", self.addr, e);
                return false;
            }
        };
        let mut link = self.new_link();
        if let Err(e) = link.dial(&target_addr).await {
            log::error!("{} Put: failed to dial target: {}", self.addr, e);
            return false;
        }
        let ok = match link.put_data(key, value, false).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("{} Put: failed to put data: {}", self.addr, e);
                false
            }
        };
        link.close();
        ok
    }

    pub async fn get(&self, key: &str) -> (bool, String) {
        let target_id = hash(key);
        let target_addr = match self.find_successor(target_id, TTL).await {
            Ok(addr) => addr,
            Err(e) => {
                log::error!("{} Get: failed in FindSuccessor: {}", self.addr, e);
                return (false, String::new());
            }
        };
        let mut link = self.new_link();
        if let Err(e) = link.dial(&target_addr).await {
            log::error!("{} Get: failed to dial target: {}", self.addr, e);
            return (false, String::new());
        }
        let result = match link.get_data_by_key(key).await {
            Ok(value) => (true, value),
            Err(e) => {
                log::error!("{} Get: failed to get data: {}", self.addr, e);
                (false, String::new())
            }
        };
        link.close();
        result
    }

    pub async fn delete(&self, key: &str) -> bool {
        let target_id = hash(key);
        let target_addr = match self.find_successor(target_id, TTL).await {
            Ok(addr) => addr,
            Err(e) => {
                log::error!("{} Delete: failed in FindSuccessor: {}", self.addr, e);
                return false;
            }
        };
        let mut link = self.new_link();
        if let Err(e) = link.dial(&target_addr).await {
            log::error!("{} Delete: failed to dial target: {}", self.addr, e);
            return false;
        }
        let ok = match link.delete_data(key, false).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("{} Delete: failed to delete data: {}", self.addr, e);
                false
            }
        };
        link.close();
        ok
    }
}
