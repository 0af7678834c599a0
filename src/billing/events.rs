//! Payment-provider event types
//!
//! Webhook envelopes are decoded into a closed set of event kinds. Only
//! the fields reconciliation reads are modelled; everything else in the
//! provider payload is ignored.

use std::collections::HashMap;

use serde::Deserialize;

use super::ReconcileError;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const INVOICE_PAYMENT_SUCCEEDED: &str = "invoice.payment_succeeded";

/// Raw webhook envelope
#[derive(Debug, Deserialize)]
struct Envelope {
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    object: serde_json::Value,
}

/// A decoded provider event
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    /// Provider event id, used for idempotence when present
    pub id: Option<String>,
    pub kind: ProviderEvent,
}

/// Event kinds meaningful to reconciliation
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    CheckoutSessionCompleted(CheckoutSession),
    InvoicePaymentSucceeded(Invoice),
    /// Accepted and ignored
    Other(String),
}

impl ProviderEvent {
    pub fn event_type(&self) -> &str {
        match self {
            ProviderEvent::CheckoutSessionCompleted(_) => CHECKOUT_SESSION_COMPLETED,
            ProviderEvent::InvoicePaymentSucceeded(_) => INVOICE_PAYMENT_SUCCEEDED,
            ProviderEvent::Other(event_type) => event_type,
        }
    }
}

impl WebhookEvent {
    /// Decode a verified webhook payload
    pub fn parse(payload: &[u8]) -> Result<Self, ReconcileError> {
        let envelope: Envelope = serde_json::from_slice(payload)
            .map_err(|e| ReconcileError::Malformed(format!("envelope: {}", e)))?;

        let kind = match envelope.event_type.as_str() {
            CHECKOUT_SESSION_COMPLETED => ProviderEvent::CheckoutSessionCompleted(
                serde_json::from_value(envelope.data.object)
                    .map_err(|e| ReconcileError::Malformed(format!("checkout session: {}", e)))?,
            ),
            INVOICE_PAYMENT_SUCCEEDED => ProviderEvent::InvoicePaymentSucceeded(
                serde_json::from_value(envelope.data.object)
                    .map_err(|e| ReconcileError::Malformed(format!("invoice: {}", e)))?,
            ),
            _ => ProviderEvent::Other(envelope.event_type),
        };

        Ok(Self {
            id: envelope.id.filter(|id| !id.is_empty()),
            kind,
        })
    }
}

/// Provider metadata map (string values only)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Option<HashMap<String, String>>);

impl Metadata {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .as_ref()
            .and_then(|m| m.get(key))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

impl From<HashMap<String, String>> for Metadata {
    fn from(map: HashMap<String, String>) -> Self {
        Self(Some(map))
    }
}

/// A reference that may arrive as a bare id or an expanded object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) | Expandable::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
}

/// Completed checkout session
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutSession {
    pub id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub customer_email: Option<String>,
    pub customer_details: Option<CustomerDetails>,
}

impl CheckoutSession {
    /// Direct user reference stamped at checkout creation
    pub fn user_id(&self) -> Option<&str> {
        self.metadata.get("uid")
    }

    pub fn email(&self) -> Option<&str> {
        self.customer_email
            .as_deref()
            .or_else(|| self.customer_details.as_ref().and_then(|d| d.email.as_deref()))
            .filter(|e| !e.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceLines {
    #[serde(default)]
    pub data: Vec<InvoiceLine>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceLine {
    pub parent: Option<InvoiceLineParent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceLineParent {
    pub subscription_item_details: Option<SubscriptionItemDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItemDetails {
    pub subscription: Option<String>,
}

/// Paid invoice
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Invoice {
    pub id: Option<String>,
    pub subscription: Option<Expandable>,
    pub customer_email: Option<String>,
    pub lines: Option<InvoiceLines>,
}

impl Invoice {
    /// Subscription the invoice bills, falling back to the first line item
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription
            .as_ref()
            .map(Expandable::id)
            .or_else(|| {
                self.lines
                    .as_ref()?
                    .data
                    .first()?
                    .parent
                    .as_ref()?
                    .subscription_item_details
                    .as_ref()?
                    .subscription
                    .as_deref()
            })
            .filter(|id| !id.is_empty())
    }

    pub fn email(&self) -> Option<&str> {
        self.customer_email.as_deref().filter(|e| !e.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItem {
    pub current_period_end: Option<i64>,
}

/// Subscription as returned by the provider API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Subscription {
    pub id: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub current_period_end: Option<i64>,
    pub items: Option<SubscriptionItems>,
    pub billing_cycle_anchor: Option<i64>,
}

impl Subscription {
    pub fn user_id(&self) -> Option<&str> {
        self.metadata.get("uid")
    }

    pub fn plan(&self) -> Option<&str> {
        self.metadata.get("plan")
    }

    /// End of the current billing period in whole seconds since epoch
    pub fn period_end_secs(&self) -> Option<i64> {
        self.current_period_end
            .or_else(|| self.items.as_ref()?.data.first()?.current_period_end)
            .or(self.billing_cycle_anchor)
            .filter(|secs| *secs > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_parse_checkout_completed() {
        let event = WebhookEvent::parse(&payload(json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_1",
                "metadata": { "uid": "user-1" },
                "customer_details": { "email": "reader@example.com" }
            }}
        })))
        .unwrap();

        assert_eq!(event.id.as_deref(), Some("evt_1"));
        match event.kind {
            ProviderEvent::CheckoutSessionCompleted(session) => {
                assert_eq!(session.user_id(), Some("user-1"));
                assert_eq!(session.email(), Some("reader@example.com"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_type_is_other() {
        let event = WebhookEvent::parse(&payload(json!({
            "id": "evt_2",
            "type": "customer.created",
            "data": { "object": { "id": "cus_1" } }
        })))
        .unwrap();

        assert!(matches!(event.kind, ProviderEvent::Other(ref t) if t == "customer.created"));
        assert_eq!(event.kind.event_type(), "customer.created");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            WebhookEvent::parse(b"not json"),
            Err(ReconcileError::Malformed(_))
        ));
    }

    #[test]
    fn test_null_metadata() {
        let session: CheckoutSession =
            serde_json::from_value(json!({ "metadata": null })).unwrap();
        assert!(session.user_id().is_none());
    }

    #[test]
    fn test_invoice_subscription_fallback() {
        let invoice: Invoice = serde_json::from_value(json!({
            "subscription": null,
            "lines": { "data": [ { "parent": {
                "subscription_item_details": { "subscription": "sub_from_line" }
            }}]}
        }))
        .unwrap();
        assert_eq!(invoice.subscription_id(), Some("sub_from_line"));

        let expanded: Invoice =
            serde_json::from_value(json!({ "subscription": { "id": "sub_obj" } })).unwrap();
        assert_eq!(expanded.subscription_id(), Some("sub_obj"));

        let missing: Invoice = serde_json::from_value(json!({})).unwrap();
        assert!(missing.subscription_id().is_none());
    }

    #[test]
    fn test_subscription_period_end_order() {
        let sub: Subscription = serde_json::from_value(json!({
            "id": "sub_1",
            "items": { "data": [ { "current_period_end": 1_700_000_000 } ] },
            "billing_cycle_anchor": 1_600_000_000
        }))
        .unwrap();
        assert_eq!(sub.period_end_secs(), Some(1_700_000_000));

        let anchor_only: Subscription = serde_json::from_value(json!({
            "id": "sub_2",
            "billing_cycle_anchor": 1_600_000_000
        }))
        .unwrap();
        assert_eq!(anchor_only.period_end_secs(), Some(1_600_000_000));
    }
}
