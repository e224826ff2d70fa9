//! HTTP implementation of the CarrierClient
//!
//! Speaks the carrier's REST API: form-encoded requests authenticated with
//! the account sid and auth token, JSON responses.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use callflow_core::{CallFlowError, CallFlowResult, CallId, CarrierClient, DialLegRequest};

use crate::error::{ServerError, ServerResult};

/// Carrier REST client
#[derive(Debug, Clone)]
pub struct HttpCarrierClient {
    /// Base URL of the carrier API
    api_base_url: String,

    /// Account sid, also the basic-auth user
    account_sid: String,

    /// Basic-auth password
    auth_token: Option<String>,

    /// HTTP client
    client: Client,
}

#[derive(Debug, Deserialize)]
struct CallResource {
    sid: String,
}

impl HttpCarrierClient {
    /// Create a new client
    pub fn new(
        api_base_url: impl Into<String>,
        account_sid: impl Into<String>,
        auth_token: Option<String>,
    ) -> ServerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ServerError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            account_sid: account_sid.into(),
            auth_token,
            client,
        })
    }

    fn calls_url(&self) -> String {
        format!("{}/Accounts/{}/Calls.json", self.api_base_url, self.account_sid)
    }

    fn call_url(&self, call_id: &CallId) -> String {
        format!(
            "{}/Accounts/{}/Calls/{}.json",
            self.api_base_url, self.account_sid, call_id
        )
    }

    async fn post_form(&self, url: String, form: &[(&str, &str)]) -> CallFlowResult<reqwest::Response> {
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, self.auth_token.as_deref())
            .form(form)
            .send()
            .await
            .map_err(|e| CallFlowError::Carrier(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CallFlowError::Carrier(format!(
                "carrier returned {}: {}",
                status, body
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl CarrierClient for HttpCarrierClient {
    async fn dial_leg(&self, request: DialLegRequest) -> CallFlowResult<CallId> {
        let timeout = request.timeout_secs.to_string();
        let response = self
            .post_form(
                self.calls_url(),
                &[
                    ("To", request.to.as_str()),
                    ("From", request.from.as_str()),
                    ("Url", request.answer_url.as_str()),
                    ("StatusCallback", request.status_callback.as_str()),
                    ("StatusCallbackEvent", "completed"),
                    ("Timeout", timeout.as_str()),
                ],
            )
            .await?;

        let call: CallResource = response
            .json()
            .await
            .map_err(|e| CallFlowError::Carrier(format!("invalid dial response: {}", e)))?;
        info!(leg = %call.sid, to = %request.to, "Dialled leg");
        Ok(CallId(call.sid))
    }

    async fn redirect_call(&self, call_id: &CallId, url: &str) -> CallFlowResult<()> {
        self.post_form(self.call_url(call_id), &[("Url", url), ("Method", "POST")])
            .await?;
        debug!(%call_id, %url, "Redirected call");
        Ok(())
    }

    async fn hangup_call(&self, call_id: &CallId) -> CallFlowResult<()> {
        self.post_form(self.call_url(call_id), &[("Status", "completed")])
            .await?;
        debug!(%call_id, "Hung up call");
        Ok(())
    }
}
