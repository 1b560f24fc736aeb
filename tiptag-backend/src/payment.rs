// Payment provider client
//
// The provider is a black box: `pay` charges the supporter toward a creator's
// payout address and `payment_status` reports where a charge stands.

use async_trait::async_trait;
use anyhow::anyhow;
use reqwest::{Client as HttpClient, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::LedgerError;
use crate::models::Money;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub amount: Money,
    pub currency: String,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    Succeeded,
    Pending,
    Failed { reason: String },
}

/// Provider's answer to `pay`: its reference for the charge and where it stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentInit {
    pub reference: String,
    pub status: PaymentStatus,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn pay(&self, request: &PaymentRequest) -> Result<PaymentInit, LedgerError>;
    async fn payment_status(&self, reference: &str) -> Result<PaymentStatus, LedgerError>;
    async fn is_healthy(&self) -> bool;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WireStatus {
    Succeeded,
    Pending,
    Failed,
}

#[derive(Debug, Deserialize)]
struct PayResponse {
    reference: String,
    status: WireStatus,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: WireStatus,
    reason: Option<String>,
}

fn to_status(status: WireStatus, reason: Option<String>) -> PaymentStatus {
    match status {
        WireStatus::Succeeded => PaymentStatus::Succeeded,
        WireStatus::Pending => PaymentStatus::Pending,
        WireStatus::Failed => PaymentStatus::Failed {
            reason: reason.unwrap_or_else(|| "payment declined".to_string()),
        },
    }
}

fn provider_error(e: reqwest::Error) -> LedgerError {
    if e.is_timeout() {
        LedgerError::ProviderTimeout
    } else {
        LedgerError::ProviderFailure(e.to_string())
    }
}

/// Hosted payment API over HTTP
pub struct HttpPaymentProvider {
    http_client: HttpClient,
    base_url: Url,
    api_key: String,
}

impl HttpPaymentProvider {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let base_url = Url::parse(&base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("payment API URL '{}' cannot carry a path", base_url));
        }
        Ok(Self {
            http_client,
            base_url,
            api_key,
        })
    }

    /// Base URL extended with escaped path segments
    fn endpoint(&self, segments: &[&str]) -> Result<Url, LedgerError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LedgerError::ProviderFailure("invalid payment API URL".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn pay(&self, request: &PaymentRequest) -> Result<PaymentInit, LedgerError> {
        info!(
            "Charging {} {} toward {}",
            request.amount, request.currency, request.destination
        );

        let resp = self
            .http_client
            .post(self.endpoint(&["payments"])?)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(provider_error)?;

        if !resp.status().is_success() {
            let status = resp.status();
            warn!("Payment provider rejected charge: {}", status);
            return Err(LedgerError::ProviderFailure(format!(
                "provider returned {}",
                status
            )));
        }

        let body: PayResponse = resp.json().await.map_err(provider_error)?;
        Ok(PaymentInit {
            reference: body.reference,
            status: to_status(body.status, body.reason),
        })
    }

    async fn payment_status(&self, reference: &str) -> Result<PaymentStatus, LedgerError> {
        let resp = self
            .http_client
            .get(self.endpoint(&["payments", reference])?)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(provider_error)?;

        if !resp.status().is_success() {
            return Err(LedgerError::ProviderFailure(format!(
                "provider returned {} for {}",
                resp.status(),
                reference
            )));
        }

        let body: StatusResponse = resp.json().await.map_err(provider_error)?;
        Ok(to_status(body.status, body.reason))
    }

    async fn is_healthy(&self) -> bool {
        let Ok(url) = self.endpoint(&["health"]) else {
            return false;
        };
        self.http_client
            .get(url)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

/// Stand-in when `PAYMENT_API_URL` is unset: every charge fails
pub struct UnconfiguredProvider;

#[async_trait]
impl PaymentProvider for UnconfiguredProvider {
    async fn pay(&self, _request: &PaymentRequest) -> Result<PaymentInit, LedgerError> {
        Err(LedgerError::ProviderFailure(
            "payment provider not configured".to_string(),
        ))
    }

    async fn payment_status(&self, _reference: &str) -> Result<PaymentStatus, LedgerError> {
        Err(LedgerError::ProviderFailure(
            "payment provider not configured".to_string(),
        ))
    }

    async fn is_healthy(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_status_parsing() {
        let body: PayResponse =
            serde_json::from_str(r#"{"reference":"tx1","status":"succeeded"}"#).unwrap();
        assert_eq!(body.reference, "tx1");
        assert_eq!(to_status(body.status, body.reason), PaymentStatus::Succeeded);

        let body: StatusResponse =
            serde_json::from_str(r#"{"status":"failed","reason":"card declined"}"#).unwrap();
        assert_eq!(
            to_status(body.status, body.reason),
            PaymentStatus::Failed {
                reason: "card declined".into()
            }
        );
    }

    #[test]
    fn test_failed_without_reason_gets_default() {
        assert_eq!(
            to_status(WireStatus::Failed, None),
            PaymentStatus::Failed {
                reason: "payment declined".into()
            }
        );
    }

    #[test]
    fn test_reference_cannot_escape_its_path_segment() {
        let provider = HttpPaymentProvider::new(
            "https://pay.example.com/api/".into(),
            String::new(),
            Duration::from_secs(1),
        )
        .unwrap();
        let url = provider.endpoint(&["payments", "a/../b?c#d"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://pay.example.com/api/payments/a%2F..%2Fb%3Fc%23d"
        );

        let bare = HttpPaymentProvider::new(
            "https://pay.example.com".into(),
            String::new(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            bare.endpoint(&["health"]).unwrap().as_str(),
            "https://pay.example.com/health"
        );
    }

    #[test]
    fn test_base_url_must_be_hierarchical() {
        let result = HttpPaymentProvider::new(
            "mailto:pay@example.com".into(),
            String::new(),
            Duration::from_secs(1),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_provider_fails_charges() {
        let request = PaymentRequest {
            amount: 100,
            currency: "USD".into(),
            destination: "0xabc".into(),
        };
        let err = UnconfiguredProvider.pay(&request).await.unwrap_err();
        assert!(matches!(err, LedgerError::ProviderFailure(_)));
        assert!(!UnconfiguredProvider.is_healthy().await);
    }
}
