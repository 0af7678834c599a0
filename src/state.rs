//! Application state management

use std::sync::Arc;

use crate::auth::IdentityVerifier;
use crate::billing::{ProviderError, Reconciler, StripeClient, SubscriptionSource, WebhookVerifier};
use crate::config::{Config, ConfigError};
use crate::documents::DocumentRegistry;
use crate::entitlement::EntitlementService;
use crate::store::EntitlementStore;

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to initialize payment provider client: {0}")]
    Billing(#[from] ProviderError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    entitlements: EntitlementService,
    reconciler: Reconciler,
    identity: Arc<dyn IdentityVerifier>,
    billing: StripeClient,
    documents: DocumentRegistry,
}

impl AppState {
    /// Create application state with the provider API as subscription source
    pub fn new(
        config: Config,
        store: Arc<dyn EntitlementStore>,
        identity: Arc<dyn IdentityVerifier>,
    ) -> Result<Self, StateError> {
        let billing = StripeClient::new(&config.billing)?;
        let subscriptions: Arc<dyn SubscriptionSource> = Arc::new(billing.clone());
        Self::build(config, store, identity, billing, subscriptions)
    }

    /// Create application state with an explicit subscription source
    pub fn with_subscriptions(
        config: Config,
        store: Arc<dyn EntitlementStore>,
        identity: Arc<dyn IdentityVerifier>,
        subscriptions: Arc<dyn SubscriptionSource>,
    ) -> Result<Self, StateError> {
        let billing = StripeClient::new(&config.billing)?;
        Self::build(config, store, identity, billing, subscriptions)
    }

    fn build(
        config: Config,
        store: Arc<dyn EntitlementStore>,
        identity: Arc<dyn IdentityVerifier>,
        billing: StripeClient,
        subscriptions: Arc<dyn SubscriptionSource>,
    ) -> Result<Self, StateError> {
        let entitlements = EntitlementService::new(store, &config.entitlement);

        // Reconciliation shares the store, lock table and timeout
        let reconciler = Reconciler::new(
            &entitlements,
            subscriptions,
            WebhookVerifier::new(
                config.billing.webhook_secret.clone(),
                config.billing.signature_tolerance_secs,
            ),
            config.entitlement.checkout_grant()?,
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                entitlements,
                reconciler,
                identity,
                billing,
                documents: DocumentRegistry::new(),
            }),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the entitlement service
    pub fn entitlements(&self) -> &EntitlementService {
        &self.inner.entitlements
    }

    /// Get the webhook reconciler
    pub fn reconciler(&self) -> &Reconciler {
        &self.inner.reconciler
    }

    /// Get the identity verifier
    pub fn identity(&self) -> &dyn IdentityVerifier {
        self.inner.identity.as_ref()
    }

    /// Get the payment provider client
    pub fn billing(&self) -> &StripeClient {
        &self.inner.billing
    }

    /// Get the document registry
    pub fn documents(&self) -> &DocumentRegistry {
        &self.inner.documents
    }
}
