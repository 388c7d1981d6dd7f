//! The `Orchestrator` gRPC service — wire glue only, wrapping
//! [`xbus_core::Orchestrator`] the way the teacher's `grpc.rs` wraps
//! `BpmnLiteEngine`.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use uuid::Uuid;
use xbus_core::{EnvelopeId, EventId, EventTypeId, Orchestrator};

#[allow(clippy::enum_variant_names)]
pub mod proto {
    tonic::include_proto!("xbus.orchestrator.v1");
}

use proto::orchestrator_server::Orchestrator as OrchestratorRpc;
use proto::*;

pub struct OrchestratorService {
    pub orchestrator: Arc<Orchestrator>,
}

#[allow(clippy::result_large_err)]
fn parse_uuid(s: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(s).map_err(|e| Status::invalid_argument(format!("invalid id {s:?}: {e}")))
}

#[tonic::async_trait]
impl OrchestratorRpc for OrchestratorService {
    async fn login(&self, request: Request<LoginRequest>) -> Result<Response<LoginReply>, Status> {
        let req = request.into_inner();
        let token = self
            .orchestrator
            .login(&req.login, &req.password)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(LoginReply { token }))
    }

    async fn logout(&self, request: Request<LogoutRequest>) -> Result<Response<BoolReply>, Status> {
        let req = request.into_inner();
        let ok = self.orchestrator.logout(&req.token).await;
        Ok(Response::new(BoolReply { ok }))
    }

    async fn register_node(
        &self,
        request: Request<RegisterNodeRequest>,
    ) -> Result<Response<BoolReply>, Status> {
        let req = request.into_inner();
        let client = Arc::new(crate::recipient_client::GrpcRecipientClient::connect(req.uri).await?);
        let ok = self.orchestrator.register_node(&req.token, client).await;
        Ok(Response::new(BoolReply { ok }))
    }

    async fn ready(&self, request: Request<ReadyRequest>) -> Result<Response<BoolReply>, Status> {
        let req = request.into_inner();
        let ok = self.orchestrator.ready(&req.token).await;
        Ok(Response::new(BoolReply { ok }))
    }

    async fn start_envelope(
        &self,
        request: Request<StartEnvelopeRequest>,
    ) -> Result<Response<StartEnvelopeReply>, Status> {
        let req = request.into_inner();
        let envelope_id = EnvelopeId::from(parse_uuid(&req.envelope_id)?);
        let envelope_id = self
            .orchestrator
            .start_envelope(envelope_id)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(StartEnvelopeReply {
            envelope_id: envelope_id.to_string(),
        }))
    }

    async fn start_event(
        &self,
        request: Request<StartEventRequest>,
    ) -> Result<Response<CodeReply>, Status> {
        let req = request.into_inner();
        let envelope_id = EnvelopeId::from(parse_uuid(&req.envelope_id)?);
        let event_id = EventId::from(parse_uuid(&req.event_id)?);
        let type_id = EventTypeId::from(parse_uuid(&req.type_id)?);
        let targets = (!req.targets.is_empty()).then_some(req.targets);

        let (code, message) = self
            .orchestrator
            .start_event(envelope_id, event_id, type_id, req.type_name, targets)
            .await;
        Ok(Response::new(CodeReply { code, message }))
    }

    async fn send_item(
        &self,
        request: Request<SendItemRequest>,
    ) -> Result<Response<CodeReply>, Status> {
        let req = request.into_inner();
        let envelope_id = EnvelopeId::from(parse_uuid(&req.envelope_id)?);
        let event_id = EventId::from(parse_uuid(&req.event_id)?);
        let (code, message) = self
            .orchestrator
            .send_item(envelope_id, event_id, req.index, req.data)
            .await;
        Ok(Response::new(CodeReply { code, message }))
    }

    async fn end_event(
        &self,
        request: Request<EndEventRequest>,
    ) -> Result<Response<CodeReply>, Status> {
        let req = request.into_inner();
        let envelope_id = EnvelopeId::from(parse_uuid(&req.envelope_id)?);
        let event_id = EventId::from(parse_uuid(&req.event_id)?);
        let (code, message) = self
            .orchestrator
            .end_event(envelope_id, event_id, req.nb_items)
            .await;
        Ok(Response::new(CodeReply { code, message }))
    }

    async fn end_envelope(
        &self,
        request: Request<EndEnvelopeRequest>,
    ) -> Result<Response<EndEnvelopeReply>, Status> {
        let req = request.into_inner();
        let envelope_id = EnvelopeId::from(parse_uuid(&req.envelope_id)?);
        let (success, envelope_id, message) = self.orchestrator.end_envelope(envelope_id).await;
        Ok(Response::new(EndEnvelopeReply {
            success,
            envelope_id: envelope_id.to_string(),
            message,
        }))
    }

    async fn cancel_envelope(
        &self,
        request: Request<CancelEnvelopeRequest>,
    ) -> Result<Response<CancelEnvelopeReply>, Status> {
        let req = request.into_inner();
        let envelope_id = EnvelopeId::from(parse_uuid(&req.envelope_id)?);
        let envelope_id = self
            .orchestrator
            .cancel_envelope(envelope_id)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(CancelEnvelopeReply {
            envelope_id: envelope_id.to_string(),
        }))
    }

    async fn inspect_envelope(
        &self,
        request: Request<InspectEnvelopeRequest>,
    ) -> Result<Response<InspectEnvelopeReply>, Status> {
        let req = request.into_inner();
        let envelope_id = EnvelopeId::from(parse_uuid(&req.envelope_id)?);
        let snapshot = self
            .orchestrator
            .inspect_envelope(envelope_id)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(InspectEnvelopeReply {
            envelope_id: snapshot.envelope_id.to_string(),
            state: snapshot
                .state
                .map(|s| format!("{s:?}").to_lowercase())
                .unwrap_or_default(),
            event_count: snapshot.event_count as u32,
        }))
    }
}
