//! The gRPC-backed [`RecipientClient`]: one open channel per registered
//! worker/consumer process (§2, §6).

use async_trait::async_trait;
use tonic::transport::Channel;
use xbus_core::{EnvelopeId, EventId, ItemPair, RecipientClient};

#[allow(clippy::enum_variant_names)]
pub mod proto {
    tonic::include_proto!("xbus.recipient.v1");
}

use proto::recipient_client::RecipientClient as RpcClient;
use proto::*;

pub struct GrpcRecipientClient {
    client: RpcClient<Channel>,
}

impl GrpcRecipientClient {
    pub async fn connect(uri: String) -> Result<Self, tonic::Status> {
        let client = RpcClient::connect(uri)
            .await
            .map_err(|e| tonic::Status::unavailable(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RecipientClient for GrpcRecipientClient {
    async fn start_event(
        &self,
        envelope_id: EnvelopeId,
        event_id: EventId,
        type_name: &str,
    ) -> anyhow::Result<bool> {
        let reply = self
            .client
            .clone()
            .start_event(StartEventRequest {
                envelope_id: envelope_id.to_string(),
                event_id: event_id.to_string(),
                type_name: type_name.to_string(),
            })
            .await?;
        Ok(reply.into_inner().ok)
    }

    async fn send_item(
        &self,
        envelope_id: EnvelopeId,
        event_id: EventId,
        indices: &[u32],
        data: &[u8],
    ) -> anyhow::Result<Vec<ItemPair>> {
        let reply = self
            .client
            .clone()
            .send_item(SendItemRequest {
                envelope_id: envelope_id.to_string(),
                event_id: event_id.to_string(),
                indices: indices.to_vec(),
                data: data.to_vec(),
            })
            .await?;
        Ok(reply
            .into_inner()
            .pairs
            .into_iter()
            .map(|p| ItemPair {
                indices: p.indices,
                data: p.data,
            })
            .collect())
    }

    async fn end_event(&self, envelope_id: EnvelopeId, event_id: EventId) -> anyhow::Result<bool> {
        let reply = self
            .client
            .clone()
            .end_event(EndEventRequest {
                envelope_id: envelope_id.to_string(),
                event_id: event_id.to_string(),
            })
            .await?;
        Ok(reply.into_inner().ok)
    }

    async fn end_envelope(&self, envelope_id: EnvelopeId) -> anyhow::Result<bool> {
        let reply = self
            .client
            .clone()
            .end_envelope(EndEnvelopeRequest {
                envelope_id: envelope_id.to_string(),
            })
            .await?;
        Ok(reply.into_inner().ok)
    }

    async fn stop_envelope(&self, envelope_id: EnvelopeId) -> anyhow::Result<()> {
        self.client
            .clone()
            .stop_envelope(StopEnvelopeRequest {
                envelope_id: envelope_id.to_string(),
            })
            .await?;
        Ok(())
    }
}
