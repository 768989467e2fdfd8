//! Connector registry and session orchestration
//!
//! Builds one [`WalletConnector`] per configured chain from the wallet
//! catalog, wires session persistence into each connector and silently
//! restores the last wallet of every eligible chain.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::bitcoin::validate_address_matches_key;
use crate::config::{ChainConfig, GlobalConfig, NetworkType};
use crate::connector::{
    ConnectorEvent, ConnectorListener, ConnectorState, ProviderContext, SubscriptionId, Wallet,
    WalletConnector, WalletMetadata,
};
use crate::error::WalletError;
use crate::provider::{BbnProvider, BtcProvider, EthProvider, IProvider};
use crate::storage::AccountStorage;
use crate::types::{Account, ChainId};

/// Static wallet metadata for every chain
#[derive(Default)]
pub struct WalletCatalog {
    pub btc: Vec<Arc<WalletMetadata<dyn BtcProvider>>>,
    pub bbn: Vec<Arc<WalletMetadata<dyn BbnProvider>>>,
    pub eth: Vec<Arc<WalletMetadata<dyn EthProvider>>>,
}

impl WalletCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_btc(mut self, metadata: WalletMetadata<dyn BtcProvider>) -> Self {
        self.btc.push(Arc::new(metadata));
        self
    }

    pub fn with_bbn(mut self, metadata: WalletMetadata<dyn BbnProvider>) -> Self {
        self.bbn.push(Arc::new(metadata));
        self
    }

    pub fn with_eth(mut self, metadata: WalletMetadata<dyn EthProvider>) -> Self {
        self.eth.push(Arc::new(metadata));
        self
    }
}

/// Connector of one chain
pub enum ChainConnector {
    Btc(WalletConnector<dyn BtcProvider>),
    Bbn(WalletConnector<dyn BbnProvider>),
    Eth(WalletConnector<dyn EthProvider>),
}

macro_rules! each_connector {
    ($self:expr, $connector:ident => $body:expr) => {
        match $self {
            ChainConnector::Btc($connector) => $body,
            ChainConnector::Bbn($connector) => $body,
            ChainConnector::Eth($connector) => $body,
        }
    };
}

impl ChainConnector {
    pub fn chain(&self) -> ChainId {
        each_connector!(self, c => c.chain())
    }

    pub fn state(&self) -> ConnectorState {
        each_connector!(self, c => c.state())
    }

    /// Connect `wallet_id`; returns the account on success
    pub async fn connect(&mut self, wallet_id: &str) -> Option<Account> {
        each_connector!(self, c => c.connect(wallet_id).await.and_then(|w| w.account().cloned()))
    }

    pub async fn disconnect(&mut self) {
        each_connector!(self, c => c.disconnect().await)
    }

    pub fn connected_wallet_id(&self) -> Option<String> {
        each_connector!(self, c => c.connected_wallet().map(|w| w.id().to_string()))
    }

    pub fn connected_account(&self) -> Option<Account> {
        each_connector!(self, c => c.connected_account().cloned())
    }

    /// `(id, name, installed)` of every listed wallet
    pub fn wallet_summaries(&self) -> Vec<(String, String, bool)> {
        each_connector!(self, c => c
            .wallets()
            .iter()
            .map(|w| (w.id().to_string(), w.name().to_string(), w.installed()))
            .collect())
    }

    pub fn has_wallet(&self, wallet_id: &str) -> bool {
        each_connector!(self, c => c.wallet(wallet_id).is_some())
    }

    pub fn subscribe(&mut self, listener: ConnectorListener) -> SubscriptionId {
        each_connector!(self, c => c.subscribe(listener))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        each_connector!(self, c => c.unsubscribe(id))
    }

    pub fn as_btc(&self) -> Option<&WalletConnector<dyn BtcProvider>> {
        match self {
            ChainConnector::Btc(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_bbn(&self) -> Option<&WalletConnector<dyn BbnProvider>> {
        match self {
            ChainConnector::Bbn(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_eth(&self) -> Option<&WalletConnector<dyn EthProvider>> {
        match self {
            ChainConnector::Eth(c) => Some(c),
            _ => None,
        }
    }
}

/// Instantiate the wallets of one chain
///
/// Disabled wallets and wallets without support for the configured network
/// are skipped. A non-injectable wallet is hidden when an installed
/// injectable wallet carries the same display name.
pub fn build_wallets<P: ?Sized>(
    metadata: &[Arc<WalletMetadata<P>>],
    context: &ProviderContext,
) -> Vec<Wallet<P>> {
    let candidates: Vec<Wallet<P>> = metadata
        .iter()
        .filter(|m| {
            if context.config.disabled_wallets.iter().any(|id| *id == m.id) {
                log::debug!("{}: wallet {} disabled", context.chain, m.id);
                return false;
            }
            m.supports(context.network())
        })
        .map(|m| Wallet::new(Arc::clone(m), m.is_installed(context)))
        .collect();

    let injected_names: HashSet<String> = candidates
        .iter()
        .filter(|w| w.metadata().injectable && w.installed())
        .map(|w| w.name().to_string())
        .collect();

    candidates
        .into_iter()
        .filter(|w| w.metadata().injectable || !injected_names.contains(w.name()))
        .collect()
}

/// Validator rejecting a Bitcoin account whose address does not belong to
/// its public key
pub fn btc_account_validator(network: NetworkType) -> crate::connector::AccountValidator {
    Arc::new(move |account: &Account| {
        if validate_address_matches_key(&account.address, &account.public_key_hex, network) {
            Ok(())
        } else {
            Err(WalletError::AddressMismatch {
                address: account.address.clone(),
                public_key_hex: account.public_key_hex.clone(),
            })
        }
    })
}

/// Listener recording connects and disconnects in the session store
pub fn persistence_listener(chain: ChainId, storage: Arc<AccountStorage>) -> ConnectorListener {
    Arc::new(move |event: &ConnectorEvent| {
        let result = match event {
            ConnectorEvent::Connect { wallet_id, .. } => storage.set(chain.as_str(), wallet_id),
            ConnectorEvent::Disconnect { .. } => storage.delete(chain.as_str()).map(|_| ()),
            _ => Ok(()),
        };
        if let Err(e) = result {
            log::warn!("{}: failed to persist session: {}", chain, e);
        }
    })
}

fn context_for(chain: ChainId, config: &ChainConfig, global: &GlobalConfig) -> ProviderContext {
    ProviderContext {
        chain,
        config: config.clone(),
        shared: Arc::new(global.shared.clone()),
    }
}

async fn restore<P: ?Sized + IProvider>(
    connector: &mut WalletConnector<P>,
    storage: &AccountStorage,
) {
    let chain = connector.chain();
    if !chain.supports_silent_reconnect() {
        return;
    }
    let Some(wallet_id) = storage.get(chain.as_str()) else {
        return;
    };
    if connector.wallet(&wallet_id).is_none() {
        log::debug!("{}: stored wallet {} is no longer listed", chain, wallet_id);
        return;
    }

    log::info!("{}: restoring session with {}", chain, wallet_id);
    if connector.connect(&wallet_id).await.is_none() {
        log::warn!("{}: could not restore session with {}", chain, wallet_id);
    }
}

async fn prepare<P: ?Sized + IProvider>(
    mut connector: WalletConnector<P>,
    storage: &Arc<AccountStorage>,
    persistence: bool,
) -> WalletConnector<P> {
    if persistence {
        connector.subscribe(persistence_listener(connector.chain(), Arc::clone(storage)));
        restore(&mut connector, storage).await;
    }
    connector
}

/// Build every configured chain's connector and restore stored sessions
pub async fn build_session(
    config: &GlobalConfig,
    catalog: &WalletCatalog,
    storage: Arc<AccountStorage>,
) -> MultiChainSession {
    let persistence = config.persistence.enabled;
    let mut connectors = BTreeMap::new();

    for entry in &config.chains {
        let context = context_for(entry.chain, &entry.config, config);

        let connector = match entry.chain {
            ChainId::Btc => {
                let wallets = build_wallets(&catalog.btc, &context);
                let network = context.network();
                let connector = WalletConnector::new(context, wallets)
                    .with_validator(btc_account_validator(network));
                ChainConnector::Btc(prepare(connector, &storage, persistence).await)
            }
            ChainId::Bbn => {
                let wallets = build_wallets(&catalog.bbn, &context);
                let connector = WalletConnector::new(context, wallets);
                ChainConnector::Bbn(prepare(connector, &storage, persistence).await)
            }
            ChainId::Eth => {
                let wallets = build_wallets(&catalog.eth, &context);
                let connector = WalletConnector::new(context, wallets);
                ChainConnector::Eth(prepare(connector, &storage, persistence).await)
            }
        };

        log::debug!(
            "{}: {} wallet(s) available",
            entry.chain,
            connector.wallet_summaries().len()
        );
        connectors.insert(entry.chain, connector);
    }

    MultiChainSession {
        connectors,
        storage,
    }
}

/// Every chain's connector plus the shared session store
pub struct MultiChainSession {
    connectors: BTreeMap<ChainId, ChainConnector>,
    storage: Arc<AccountStorage>,
}

impl MultiChainSession {
    pub fn storage(&self) -> &Arc<AccountStorage> {
        &self.storage
    }

    pub fn chains(&self) -> Vec<ChainId> {
        self.connectors.keys().copied().collect()
    }

    pub fn connector(&self, chain: ChainId) -> Option<&ChainConnector> {
        self.connectors.get(&chain)
    }

    pub fn connector_mut(&mut self, chain: ChainId) -> Option<&mut ChainConnector> {
        self.connectors.get_mut(&chain)
    }

    /// Connect `wallet_id` on `chain`
    ///
    /// An unconfigured chain yields `None`; other failures are reported
    /// through the chain connector's `error` event.
    pub async fn connect(&mut self, chain: ChainId, wallet_id: &str) -> Option<Account> {
        match self.connectors.get_mut(&chain) {
            Some(connector) => connector.connect(wallet_id).await,
            None => {
                log::warn!("{} is not configured", chain);
                None
            }
        }
    }

    pub async fn disconnect(&mut self, chain: ChainId) {
        if let Some(connector) = self.connectors.get_mut(&chain) {
            connector.disconnect().await;
        }
    }

    pub async fn disconnect_all(&mut self) {
        for connector in self.connectors.values_mut() {
            connector.disconnect().await;
        }
    }

    /// Connected account per chain
    pub fn accounts(&self) -> BTreeMap<ChainId, Account> {
        self.connectors
            .iter()
            .filter_map(|(chain, connector)| connector.connected_account().map(|a| (*chain, a)))
            .collect()
    }

    pub fn btc(&self) -> Option<&WalletConnector<dyn BtcProvider>> {
        self.connector(ChainId::Btc).and_then(ChainConnector::as_btc)
    }

    pub fn bbn(&self) -> Option<&WalletConnector<dyn BbnProvider>> {
        self.connector(ChainId::Bbn).and_then(ChainConnector::as_bbn)
    }

    pub fn eth(&self) -> Option<&WalletConnector<dyn EthProvider>> {
        self.connector(ChainId::Eth).and_then(ChainConnector::as_eth)
    }

    pub fn btc_provider(&self) -> Option<Arc<dyn BtcProvider>> {
        self.btc().and_then(|c| c.connected_provider())
    }

    pub fn bbn_provider(&self) -> Option<Arc<dyn BbnProvider>> {
        self.bbn().and_then(|c| c.connected_provider())
    }

    pub fn eth_provider(&self) -> Option<Arc<dyn EthProvider>> {
        self.eth().and_then(|c| c.connected_provider())
    }
}
