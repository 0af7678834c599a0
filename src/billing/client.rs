//! Payment provider client
//!
//! Thin REST client for the provider API: subscription lookup (used by
//! reconciliation), checkout sessions and billing-portal sessions.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use super::events::Subscription;
use crate::config::BillingConfig;
use crate::entitlement::SubscriptionPlan;

/// Provider API errors
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Provider object not found: {0}")]
    NotFound(String),

    #[error("No price configured for plan {0}")]
    UnsupportedPlan(&'static str),
}

/// Source of subscription details for invoice reconciliation
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    async fn fetch_subscription(&self, subscription_id: &str) -> Result<Subscription, ProviderError>;
}

/// Hosted session returned to the browser
#[derive(Debug, Clone, Deserialize)]
pub struct HostedSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomerList {
    data: Vec<Customer>,
}

#[derive(Debug, Deserialize)]
struct Customer {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

/// REST client for the payment provider
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    api_key: String,
    api_base: String,
    monthly_price_id: String,
    yearly_price_id: String,
    return_url: String,
}

impl StripeClient {
    pub fn new(config: &BillingConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            monthly_price_id: config.monthly_price_id.clone(),
            yearly_price_id: config.yearly_price_id.clone(),
            return_url: config.public_base_url.clone(),
        })
    }

    fn price_for(&self, plan: SubscriptionPlan) -> Result<&str, ProviderError> {
        match plan {
            SubscriptionPlan::Monthly => Ok(self.monthly_price_id.as_str()),
            SubscriptionPlan::Yearly => Ok(self.yearly_price_id.as_str()),
            other => Err(ProviderError::UnsupportedPlan(other.as_str())),
        }
    }

    /// Start a subscription checkout for `user_id`
    ///
    /// The user id and plan are stamped on both the session and the
    /// subscription it creates, so later events resolve identity directly.
    pub async fn create_checkout_session(
        &self,
        user_id: &str,
        email: Option<&str>,
        plan: SubscriptionPlan,
    ) -> Result<HostedSession, ProviderError> {
        let price = self.price_for(plan)?;

        let mut form: Vec<(&str, &str)> = vec![
            ("mode", "subscription"),
            ("payment_method_types[0]", "card"),
            ("line_items[0][price]", price),
            ("line_items[0][quantity]", "1"),
            ("metadata[uid]", user_id),
            ("metadata[plan]", plan.as_str()),
            ("subscription_data[metadata][uid]", user_id),
            ("subscription_data[metadata][plan]", plan.as_str()),
            ("success_url", self.return_url.as_str()),
            ("cancel_url", self.return_url.as_str()),
        ];
        if let Some(email) = email {
            form.push(("customer_email", email));
        }

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.api_key)
            .form(&form)
            .send()
            .await?;

        let session: HostedSession = parse(response, "checkout session").await?;
        tracing::info!(user_id = %user_id, session_id = %session.id, plan = plan.as_str(), "Checkout session created");
        Ok(session)
    }

    /// Open the self-service billing portal for the customer with `email`
    pub async fn create_portal_session(&self, email: &str) -> Result<HostedSession, ProviderError> {
        let response = self
            .http
            .get(format!("{}/v1/customers", self.api_base))
            .bearer_auth(&self.api_key)
            .query(&[("email", email), ("limit", "1")])
            .send()
            .await?;

        let customers: CustomerList = parse(response, "customer list").await?;
        let customer = customers
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NotFound(format!("customer with email {}", email)))?;

        let response = self
            .http
            .post(format!("{}/v1/billing_portal/sessions", self.api_base))
            .bearer_auth(&self.api_key)
            .form(&[("customer", customer.id.as_str()), ("return_url", self.return_url.as_str())])
            .send()
            .await?;

        parse(response, "portal session").await
    }
}

#[async_trait]
impl SubscriptionSource for StripeClient {
    async fn fetch_subscription(&self, subscription_id: &str) -> Result<Subscription, ProviderError> {
        let response = self
            .http
            .get(format!("{}/v1/subscriptions/{}", self.api_base, subscription_id))
            .bearer_auth(&self.api_key)
            .query(&[("expand[]", "items.data")])
            .send()
            .await?;

        parse(response, subscription_id).await
    }
}

async fn parse<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
    what: &str,
) -> Result<T, ProviderError> {
    let status = response.status();

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound(what.to_string()));
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .ok()
            .and_then(|b| b.error.message)
            .unwrap_or(body);
        return Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        });
    }

    Ok(response.json().await?)
}
