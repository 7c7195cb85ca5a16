use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

use crate::accrual::models::{AccrualOutcome, RetryDirective};
use crate::accrual::traits::AccrualLookup;
use crate::error::{AccrualError, AppError, AppResult};

/// Identification sent with every lookup
pub const CLIENT_USER_AGENT: &str = "accrual-reconciler client";

/// HTTP client for the accrual (scoring) service
pub struct AccrualClient {
    client: Client,
    base_url: Url,
    default_retry_after_secs: u64,
}

impl AccrualClient {
    pub fn new(base_url: &str, timeout: Duration, default_retry_after_secs: u64) -> AppResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::InvalidInput(format!("Invalid accrual address {}: {}", base_url, e)))?;

        if base_url.cannot_be_a_base() {
            return Err(AppError::InvalidInput(format!(
                "Accrual address {} cannot be used as a base URL",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(CLIENT_USER_AGENT)
            .build()
            .map_err(AccrualError::from)?;

        Ok(Self {
            client,
            base_url,
            default_retry_after_secs,
        })
    }

    /// `{base}/api/orders/{order_id}` with the id escaped as one path segment
    fn order_url(&self, order_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["api", "orders", order_id]);
        }
        url
    }
}

#[async_trait]
impl AccrualLookup for AccrualClient {
    async fn lookup(&self, order_id: &str) -> Result<AccrualOutcome, AccrualError> {
        if order_id.is_empty() {
            return Err(AccrualError::EmptyOrderId);
        }

        let response = self
            .client
            .get(self.order_url(order_id))
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let outcome: AccrualOutcome = response.json().await?;
                if outcome.order_id != order_id {
                    return Err(AccrualError::ProviderProtocolError {
                        order_id: order_id.to_string(),
                        status: StatusCode::OK.as_u16(),
                    });
                }
                debug!(order_id, status = %outcome.status, "accrual status received");
                Ok(outcome)
            }
            StatusCode::NO_CONTENT => Err(AccrualError::OrderNotRegistered {
                order_id: order_id.to_string(),
            }),
            StatusCode::TOO_MANY_REQUESTS => {
                let header = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|value| value.to_str().ok());
                let directive = RetryDirective::from_header(header, self.default_retry_after_secs);
                debug!(order_id, retry_after = directive.retry_after_secs, "accrual service throttled");
                Err(AccrualError::RateLimited(directive))
            }
            StatusCode::INTERNAL_SERVER_ERROR => Err(AccrualError::ProviderServerError {
                order_id: order_id.to_string(),
            }),
            other => Err(AccrualError::ProviderProtocolError {
                order_id: order_id.to_string(),
                status: other.as_u16(),
            }),
        }
    }
}
