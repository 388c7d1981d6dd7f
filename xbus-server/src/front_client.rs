//! `register_on_front` (§4.1): the one call this core makes outward, at
//! startup, to announce itself to the front.

#[allow(clippy::enum_variant_names)]
pub mod proto {
    tonic::include_proto!("xbus.front.v1");
}

use proto::front_client::FrontClient;
use proto::RegisterBackendRequest;

/// Connect to the front's back-registration endpoint and call
/// `register_backend(self_uri)`. A transport failure or rejected call is
/// fatal, per §4.1.
pub async fn register_on_front(front_uri: &str, self_uri: &str) -> anyhow::Result<()> {
    let mut client = FrontClient::connect(front_uri.to_string()).await?;
    client
        .register_backend(RegisterBackendRequest {
            self_uri: self_uri.to_string(),
        })
        .await?;
    Ok(())
}
