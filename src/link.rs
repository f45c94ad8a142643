//! Remote link: a lazily-dialed, cached request/reply channel to one peer.
//!
//! A link is a triple (peer address, peer id, open channel or none) per
//! spec.md §3. Dialing sets address+id before the channel is ready so a
//! failed dial still records who we tried to reach; closing clears all
//! three fields and tolerates repeated invocation.

use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tonic::Request;

use crate::error::ChordError;
use crate::ring::hash;
use crate::rpc::proto::chord_client::ChordClient;
use crate::rpc::proto::{
    DataMapReply, DeleteDataRequest, Empty, FindSuccessorRequest, GetAllDataRequest, KeyRequest,
    NotifyRequest, PingRequest, PredInformExitRequest, PutDataRequest, SuccInformExitRequest,
};

const PING_SENTINEL_REQUEST: i32 = 114_514;
const PING_SENTINEL_REPLY: i32 = 1_919_810;

#[derive(Clone)]
pub struct RemoteLink {
    addr: Option<String>,
    id: Option<u32>,
    client: Option<ChordClient<Channel>>,
    dial_timeout: Duration,
    call_timeout: Duration,
}

impl RemoteLink {
    pub fn new(dial_timeout: Duration, call_timeout: Duration) -> Self {
        RemoteLink {
            addr: None,
            id: None,
            client: None,
            dial_timeout,
            call_timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    pub fn address(&self) -> Option<&str> {
        self.addr.as_deref()
    }

    pub fn id(&self) -> Option<u32> {
        self.id
    }

    /// Idempotent: clears all three fields regardless of current state.
    pub fn close(&mut self) {
        self.addr = None;
        self.id = None;
        self.client = None;
    }

    pub async fn dial(&mut self, addr: &str) -> Result<(), ChordError> {
        self.addr = Some(addr.to_string());
        self.id = Some(hash(addr));

        let endpoint = Endpoint::from_shared(format!("http://{addr}"))
            .map_err(|e| ChordError::DialFailed(addr.to_string(), e.to_string()))?
            .connect_timeout(self.dial_timeout)
            .timeout(self.call_timeout);

        match endpoint.connect().await {
            Ok(channel) => {
                self.client = Some(ChordClient::new(channel));
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(ChordError::DialFailed(addr.to_string(), e.to_string()))
            }
        }
    }

    fn client_mut(&mut self) -> Result<&mut ChordClient<Channel>, ChordError> {
        self.client
            .as_mut()
            .ok_or_else(|| ChordError::CallFailed("link not connected".into()))
    }

    pub async fn find_successor(&mut self, id: u32, ttl: i16) -> Result<String, ChordError> {
        let addr = self.addr.clone().unwrap_or_default();
        let reply = self
            .client_mut()?
            .find_successor(Request::new(FindSuccessorRequest {
                id,
                ttl: ttl as i32,
            }))
            .await
            .map_err(|s| {
                let err: ChordError = s.into();
                if matches!(err, ChordError::CallFailed(_)) {
                    ChordError::CallFailed(format!("find_successor to {addr} failed"))
                } else {
                    err
                }
            })?;
        Ok(reply.into_inner().address)
    }

    pub async fn get_predecessor(&mut self) -> Result<String, ChordError> {
        let reply = self
            .client_mut()?
            .get_predecessor(Request::new(Empty {}))
            .await
            .map_err(ChordError::from)?;
        Ok(reply.into_inner().address)
    }

    /// Sentinel liveness probe. A missing/timed-out/mismatched reply closes
    /// the link and reports failure.
    pub async fn ping(&mut self) -> Result<(), ChordError> {
        let result = async {
            let reply = self
                .client_mut()?
                .ping(Request::new(PingRequest {
                    sentinel: PING_SENTINEL_REQUEST,
                }))
                .await
                .map_err(ChordError::from)?;
            if reply.into_inner().sentinel != PING_SENTINEL_REPLY {
                let addr = self.addr.clone().unwrap_or_default();
                return Err(ChordError::SuspiciousPingReply(addr));
            }
            Ok(())
        }
        .await;

        if result.is_err() {
            self.close();
        }
        result
    }

    pub async fn notify(&mut self, addr: &str) -> Result<(), ChordError> {
        self.client_mut()?
            .notify(Request::new(NotifyRequest {
                address: addr.to_string(),
            }))
            .await
            .map_err(ChordError::from)?;
        Ok(())
    }

    pub async fn get_succ_list(&mut self) -> Result<Vec<String>, ChordError> {
        let reply = self
            .client_mut()?
            .get_succ_list(Request::new(Empty {}))
            .await
            .map_err(ChordError::from)?;
        Ok(reply.into_inner().addresses)
    }

    pub async fn get_all_data(
        &mut self,
        is_backup: bool,
    ) -> Result<std::collections::HashMap<String, String>, ChordError> {
        let reply = self
            .client_mut()?
            .get_all_data(Request::new(GetAllDataRequest { is_backup }))
            .await
            .map_err(ChordError::from)?;
        Ok(reply.into_inner().entries)
    }

    pub async fn get_data_by_key(&mut self, key: &str) -> Result<String, ChordError> {
        let reply = self
            .client_mut()?
            .get_data_by_key(Request::new(KeyRequest {
                key: key.to_string(),
            }))
            .await
            .map_err(ChordError::from)?;
        Ok(reply.into_inner().value)
    }

    pub async fn put_data(
        &mut self,
        key: &str,
        value: &str,
        is_backup: bool,
    ) -> Result<(), ChordError> {
        self.client_mut()?
            .put_data(Request::new(PutDataRequest {
                is_backup,
                key: key.to_string(),
                value: value.to_string(),
            }))
            .await
            .map_err(ChordError::from)?;
        Ok(())
    }

    pub async fn delete_data(&mut self, key: &str, is_backup: bool) -> Result<(), ChordError> {
        self.client_mut()?
            .delete_data(Request::new(DeleteDataRequest {
                is_backup,
                key: key.to_string(),
            }))
            .await
            .map_err(ChordError::from)?;
        Ok(())
    }

    pub async fn send_backup_data(
        &mut self,
        data: std::collections::HashMap<String, String>,
    ) -> Result<(), ChordError> {
        self.client_mut()?
            .send_backup_data(Request::new(DataMapReply { entries: data }))
            .await
            .map_err(ChordError::from)?;
        Ok(())
    }

    pub async fn succ_inform_exit(
        &mut self,
        addr: &str,
        pre_addr: &str,
        data: std::collections::HashMap<String, String>,
    ) -> Result<(), ChordError> {
        self.client_mut()?
            .succ_inform_exit(Request::new(SuccInformExitRequest {
                addr: addr.to_string(),
                pre_addr: pre_addr.to_string(),
                data,
            }))
            .await
            .map_err(ChordError::from)?;
        Ok(())
    }

    pub async fn pred_inform_exit(&mut self, addr: &str, succ_addr: &str) -> Result<(), ChordError> {
        self.client_mut()?
            .pred_inform_exit(Request::new(PredInformExitRequest {
                addr: addr.to_string(),
                succ_addr: succ_addr.to_string(),
            }))
            .await
            .map_err(ChordError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_link_is_disconnected() {
        let link = RemoteLink::new(Duration::from_secs(1), Duration::from_secs(1));
        assert!(!link.is_connected());
        assert_eq!(link.address(), None);
    }

    #[test]
    fn close_is_idempotent() {
        let mut link = RemoteLink::new(Duration::from_secs(1), Duration::from_secs(1));
        link.close();
        link.close();
        assert!(!link.is_connected());
    }
}
