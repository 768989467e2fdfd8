//! Per-chain wallet connector
//!
//! Owns the chain's wallets, tracks the one connected wallet and notifies
//! subscribers of `connecting`, `connect`, `disconnect` and `error`.
//!
//! State: Idle → Connecting → Connected → Idle. A failed `connect` restores
//! whatever state preceded it.

use std::sync::Arc;

use crate::config::{ChainConfig, NetworkType, SharedWalletConfig};
use crate::error::WalletError;
use crate::provider::IProvider;
use crate::types::{Account, ChainId};

pub mod registry;

pub use registry::{build_session, ChainConnector, MultiChainSession, WalletCatalog};

/// Context handed to provider factories and installed-probes
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub chain: ChainId,
    pub config: ChainConfig,
    pub shared: Arc<SharedWalletConfig>,
}

impl ProviderContext {
    pub fn network(&self) -> NetworkType {
        self.config.network
    }
}

pub type ProviderFactory<P> =
    Arc<dyn Fn(&ProviderContext) -> Result<Arc<P>, WalletError> + Send + Sync>;

pub type InstalledProbe = Arc<dyn Fn(&ProviderContext) -> bool + Send + Sync>;

/// Static descriptor of an installable wallet
pub struct WalletMetadata<P: ?Sized> {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub docs: String,
    pub networks: Vec<NetworkType>,
    /// Injected by a host extension (vs. bundled signer)
    pub injectable: bool,
    pub factory: ProviderFactory<P>,
    /// Whether the wallet is present; absent probe means always installed
    pub probe: Option<InstalledProbe>,
}

impl<P: ?Sized> WalletMetadata<P> {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        networks: Vec<NetworkType>,
        factory: ProviderFactory<P>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: String::new(),
            docs: String::new(),
            networks,
            injectable: false,
            factory,
            probe: None,
        }
    }

    pub fn injectable(mut self, probe: InstalledProbe) -> Self {
        self.injectable = true;
        self.probe = Some(probe);
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn with_docs(mut self, docs: impl Into<String>) -> Self {
        self.docs = docs.into();
        self
    }

    pub fn supports(&self, network: NetworkType) -> bool {
        self.networks.contains(&network)
    }

    pub fn is_installed(&self, context: &ProviderContext) -> bool {
        self.probe.as_ref().map(|probe| probe(context)).unwrap_or(true)
    }
}

impl<P: ?Sized> std::fmt::Debug for WalletMetadata<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletMetadata")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("networks", &self.networks)
            .field("injectable", &self.injectable)
            .finish()
    }
}

/// Runtime wallet: metadata plus a lazily created provider
pub struct Wallet<P: ?Sized> {
    metadata: Arc<WalletMetadata<P>>,
    installed: bool,
    provider: Option<Arc<P>>,
    account: Option<Account>,
}

impl<P: ?Sized> Wallet<P> {
    pub fn new(metadata: Arc<WalletMetadata<P>>, installed: bool) -> Self {
        Self {
            metadata,
            installed,
            provider: None,
            account: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn icon(&self) -> &str {
        &self.metadata.icon
    }

    pub fn docs(&self) -> &str {
        &self.metadata.docs
    }

    pub fn installed(&self) -> bool {
        self.installed
    }

    pub fn metadata(&self) -> &WalletMetadata<P> {
        &self.metadata
    }

    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    pub fn provider(&self) -> Option<Arc<P>> {
        self.provider.clone()
    }

    fn provider_or_create(&mut self, context: &ProviderContext) -> Result<Arc<P>, WalletError> {
        if let Some(provider) = &self.provider {
            return Ok(Arc::clone(provider));
        }
        let provider = (self.metadata.factory)(context)?;
        self.provider = Some(Arc::clone(&provider));
        Ok(provider)
    }
}

/// Connector lifecycle events
#[derive(Debug, Clone)]
pub enum ConnectorEvent {
    Connecting { wallet_id: String },
    Connect { wallet_id: String, account: Account },
    Disconnect { wallet_id: String },
    Error(Arc<WalletError>),
}

pub type ConnectorListener = Arc<dyn Fn(&ConnectorEvent) + Send + Sync>;

/// Extra check applied to an account before a connection is accepted
pub type AccountValidator = Arc<dyn Fn(&Account) -> Result<(), WalletError> + Send + Sync>;

pub type SubscriptionId = u64;

/// Connector state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Idle,
    Connecting { wallet: usize },
    Connected { wallet: usize },
}

/// Connector for one chain
pub struct WalletConnector<P: ?Sized + IProvider> {
    context: ProviderContext,
    wallets: Vec<Wallet<P>>,
    state: ConnectorState,
    listeners: Vec<(SubscriptionId, ConnectorListener)>,
    next_subscription: SubscriptionId,
    validator: Option<AccountValidator>,
}

impl<P: ?Sized + IProvider> WalletConnector<P> {
    pub fn new(context: ProviderContext, wallets: Vec<Wallet<P>>) -> Self {
        Self {
            context,
            wallets,
            state: ConnectorState::Idle,
            listeners: Vec::new(),
            next_subscription: 0,
            validator: None,
        }
    }

    pub fn with_validator(mut self, validator: AccountValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn chain(&self) -> ChainId {
        self.context.chain
    }

    pub fn context(&self) -> &ProviderContext {
        &self.context
    }

    pub fn wallets(&self) -> &[Wallet<P>] {
        &self.wallets
    }

    pub fn wallet(&self, wallet_id: &str) -> Option<&Wallet<P>> {
        self.wallets.iter().find(|wallet| wallet.id() == wallet_id)
    }

    pub fn state(&self) -> ConnectorState {
        self.state
    }

    pub fn connected_wallet(&self) -> Option<&Wallet<P>> {
        match self.state {
            ConnectorState::Connected { wallet } => self.wallets.get(wallet),
            _ => None,
        }
    }

    pub fn connected_account(&self) -> Option<&Account> {
        self.connected_wallet().and_then(Wallet::account)
    }

    pub fn connected_provider(&self) -> Option<Arc<P>> {
        self.connected_wallet().and_then(Wallet::provider)
    }

    pub fn subscribe(&mut self, listener: ConnectorListener) -> SubscriptionId {
        self.next_subscription += 1;
        self.listeners.push((self.next_subscription, listener));
        self.next_subscription
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(subscription, _)| *subscription != id);
        self.listeners.len() != before
    }

    fn emit(&self, event: &ConnectorEvent) {
        for (_, listener) in &self.listeners {
            listener(event);
        }
    }

    fn emit_error(&self, error: WalletError) {
        log::warn!("{} connector error: {}", self.context.chain, error);
        self.emit(&ConnectorEvent::Error(Arc::new(error)));
    }

    /// Connect the wallet `wallet_id`
    ///
    /// Failures are delivered through the `error` event and yield `None`.
    pub async fn connect(&mut self, wallet_id: &str) -> Option<&Wallet<P>> {
        let Some(index) = self.wallets.iter().position(|wallet| wallet.id() == wallet_id) else {
            self.emit_error(WalletError::WalletNotFound(wallet_id.to_string()));
            return None;
        };

        let previous = self.state;
        self.state = ConnectorState::Connecting { wallet: index };
        log::info!("{}: connecting {}", self.context.chain, wallet_id);
        self.emit(&ConnectorEvent::Connecting {
            wallet_id: wallet_id.to_string(),
        });

        match self.establish(index).await {
            Ok(account) => {
                if let ConnectorState::Connected { wallet } = previous {
                    if wallet != index {
                        self.wallets[wallet].account = None;
                    }
                }
                self.wallets[index].account = Some(account.clone());
                self.state = ConnectorState::Connected { wallet: index };
                log::info!("{}: connected {} as {}", self.context.chain, wallet_id, account.address);
                self.emit(&ConnectorEvent::Connect {
                    wallet_id: wallet_id.to_string(),
                    account,
                });
                self.wallets.get(index)
            }
            Err(error) => {
                self.state = previous;
                self.emit_error(error);
                None
            }
        }
    }

    async fn establish(&mut self, index: usize) -> Result<Account, WalletError> {
        let provider = self.wallets[index].provider_or_create(&self.context)?;

        provider.connect_wallet().await?;
        let account = Account {
            address: provider.get_address().await?,
            public_key_hex: provider.get_public_key_hex().await?,
        };

        if let Some(validator) = &self.validator {
            validator(&account)?;
        }
        Ok(account)
    }

    /// Disconnect the connected wallet
    ///
    /// Silent when nothing is connected. Vendor disconnect failures are
    /// logged and swallowed.
    pub async fn disconnect(&mut self) {
        let ConnectorState::Connected { wallet: index } = self.state else {
            return;
        };

        if let Some(provider) = self.wallets[index].provider() {
            if let Err(e) = provider.disconnect().await {
                log::warn!(
                    "{}: ignoring disconnect failure from {}: {}",
                    self.context.chain,
                    self.wallets[index].id(),
                    e
                );
            }
        }

        self.wallets[index].account = None;
        self.state = ConnectorState::Idle;

        let wallet_id = self.wallets[index].id().to_string();
        log::info!("{}: disconnected {}", self.context.chain, wallet_id);
        self.emit(&ConnectorEvent::Disconnect { wallet_id });
    }
}
