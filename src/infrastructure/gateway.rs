//! HTTP client for the mobile-money collection provider.

use crate::domain::charge::{CollectionRequest, GatewayResponse, GatewayStatus};
use crate::domain::ports::Gateway;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Serialize)]
struct CollectionBody<'a> {
    amount: String,
    phone_number: &'a str,
    reference: &'a str,
    description: &'a str,
}

#[derive(Deserialize)]
struct CollectionReply {
    #[serde(default)]
    success: bool,
    #[serde(default, alias = "transaction_id")]
    external_id: Option<String>,
    status: Option<String>,
    #[serde(default, alias = "message")]
    error: Option<String>,
}

/// Posts collection requests to `{base_url}/collections`.
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::ExternalGatewayError(format!("client setup failed: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

/// Maps a provider status string onto the three states we act on.
pub fn parse_status(raw: Option<&str>, success: bool) -> GatewayStatus {
    match raw.map(|s| s.to_ascii_uppercase()) {
        Some(s) if matches!(s.as_str(), "SUCCESS" | "SUCCESSFUL" | "COMPLETED") => GatewayStatus::Success,
        Some(s) if matches!(s.as_str(), "PENDING" | "PROCESSING" | "INITIATED") => GatewayStatus::Pending,
        Some(_) => GatewayStatus::Failed,
        None if success => GatewayStatus::Pending,
        None => GatewayStatus::Failed,
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn initiate(&self, request: &CollectionRequest) -> Result<GatewayResponse> {
        let url = format!("{}/collections", self.base_url);
        let body = CollectionBody {
            amount: request.amount.to_string(),
            phone_number: &request.payer,
            reference: &request.reference,
            description: &request.description,
        };

        let mut call = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call
            .send()
            .await
            .map_err(|e| PaymentError::ExternalGatewayError(format!("network error: {e}")))?;

        let status = response.status();
        let reply: CollectionReply = response
            .json()
            .await
            .map_err(|e| PaymentError::ExternalGatewayError(format!("parse error: {e}")))?;

        if !status.is_success() {
            warn!(reference = %request.reference, %status, "gateway rejected collection");
            return Ok(GatewayResponse {
                success: false,
                external_id: reply.external_id,
                status: GatewayStatus::Failed,
                error: reply.error.or_else(|| Some(format!("gateway returned {status}"))),
            });
        }

        let gateway_status = parse_status(reply.status.as_deref(), reply.success);
        debug!(reference = %request.reference, status = ?gateway_status, "gateway accepted collection");
        Ok(GatewayResponse {
            success: reply.success || gateway_status != GatewayStatus::Failed,
            external_id: reply.external_id,
            status: gateway_status,
            error: reply.error,
        })
    }
}
