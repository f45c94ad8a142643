//! Generated gRPC types and the server-side glue that dispatches incoming
//! calls onto a [`crate::node::ChordNode`].

use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::node::ChordNode;

pub mod proto {
    tonic::include_proto!("chord");
}

use proto::chord_server::Chord;
use proto::{
    AddressReply, DataMapReply, DeleteDataRequest, Empty, FindSuccessorRequest,
    GetAllDataRequest, KeyRequest, NotifyRequest, OkReply, PingReply, PingRequest,
    PredInformExitRequest, PutDataRequest, SuccInformExitRequest, SuccListReply, ValueReply,
};

/// Thin adapter: every handler here just unwraps the request, calls the
/// corresponding method on [`ChordNode`], and maps [`crate::error::ChordError`]
/// onto a [`Status`]. All algorithmic work lives on `ChordNode` so it can be
/// unit-tested without spinning up a gRPC server.
pub struct ChordRpc {
    pub node: Arc<ChordNode>,
}

#[tonic::async_trait]
impl Chord for ChordRpc {
    async fn find_successor(
        &self,
        request: Request<FindSuccessorRequest>,
    ) -> Result<Response<AddressReply>, Status> {
        let req = request.into_inner();
        let address = self
            .node
            .find_successor(req.id, req.ttl as i16)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(AddressReply { address }))
    }

    async fn get_predecessor(&self, _: Request<Empty>) -> Result<Response<AddressReply>, Status> {
        let address = self.node.get_predecessor_addr().await.map_err(Status::from)?;
        Ok(Response::new(AddressReply { address }))
    }

    async fn ping(&self, request: Request<PingRequest>) -> Result<Response<PingReply>, Status> {
        const SENTINEL_REQUEST: i32 = 114_514;
        const SENTINEL_REPLY: i32 = 1_919_810;
        if request.into_inner().sentinel != SENTINEL_REQUEST {
            return Err(Status::invalid_argument("suspicious ping request"));
        }
        Ok(Response::new(PingReply {
            sentinel: SENTINEL_REPLY,
        }))
    }

    async fn notify(&self, request: Request<NotifyRequest>) -> Result<Response<Empty>, Status> {
        self.node.notify(request.into_inner().address).await;
        Ok(Response::new(Empty {}))
    }

    async fn get_succ_list(&self, _: Request<Empty>) -> Result<Response<SuccListReply>, Status> {
        let addresses = self.node.succ_list_snapshot().await;
        Ok(Response::new(SuccListReply { addresses }))
    }

    async fn get_all_data(
        &self,
        request: Request<GetAllDataRequest>,
    ) -> Result<Response<DataMapReply>, Status> {
        let entries = self
            .node
            .get_all_data(request.into_inner().is_backup)
            .await;
        Ok(Response::new(DataMapReply { entries }))
    }

    async fn get_data_by_key(
        &self,
        request: Request<KeyRequest>,
    ) -> Result<Response<ValueReply>, Status> {
        let value = self
            .node
            .get_data_by_key(&request.into_inner().key)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(ValueReply { value }))
    }

    async fn put_data(
        &self,
        request: Request<PutDataRequest>,
    ) -> Result<Response<OkReply>, Status> {
        let req = request.into_inner();
        self.node.put_data(req.key, req.value, req.is_backup).await;
        Ok(Response::new(OkReply { ok: true }))
    }

    async fn delete_data(
        &self,
        request: Request<DeleteDataRequest>,
    ) -> Result<Response<OkReply>, Status> {
        let req = request.into_inner();
        self.node.delete_data(&req.key, req.is_backup).await;
        Ok(Response::new(OkReply { ok: true }))
    }

    async fn send_backup_data(
        &self,
        request: Request<DataMapReply>,
    ) -> Result<Response<OkReply>, Status> {
        self.node
            .merge_backup_data(request.into_inner().entries)
            .await;
        Ok(Response::new(OkReply { ok: true }))
    }

    async fn succ_inform_exit(
        &self,
        request: Request<SuccInformExitRequest>,
    ) -> Result<Response<OkReply>, Status> {
        let req = request.into_inner();
        self.node
            .succ_inform_exit(req.addr, req.pre_addr, req.data)
            .await;
        Ok(Response::new(OkReply { ok: true }))
    }

    async fn pred_inform_exit(
        &self,
        request: Request<PredInformExitRequest>,
    ) -> Result<Response<OkReply>, Status> {
        let req = request.into_inner();
        self.node.pred_inform_exit(req.addr, req.succ_addr).await;
        Ok(Response::new(OkReply { ok: true }))
    }
}
