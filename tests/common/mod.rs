//! Shared test fixtures
//!
//! Fake vendor objects for every provider boundary, an APDU device
//! simulator backed by a real keystore, and a controllable clock.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bitcoin::bip32::DerivationPath;
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::OP_CHECKSIG;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::taproot::{LeafVersion, TaprootBuilder};
use bitcoin::{
    absolute, script, transaction, Address, Amount, OutPoint, ScriptBuf, Transaction, TxIn,
    TxOut, Txid, XOnlyPublicKey,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use staking_wallet_connector::bitcoin::message::sign_ecdsa_message;
use staking_wallet_connector::bitcoin::psbt::{psbt_from_hex, psbt_to_hex, sign_input, SignMode};
use staking_wallet_connector::bitcoin::SignMessageType;
use staking_wallet_connector::config::{GlobalConfig, NetworkType};
use staking_wallet_connector::connector::{
    ConnectorEvent, ConnectorListener, ProviderContext, WalletMetadata,
};
use staking_wallet_connector::error::WalletError;
use staking_wallet_connector::provider::airgap::{AirGappedRequest, QrChannel, QrError};
use staking_wallet_connector::provider::cosmos::{CosmosExtension, CosmosKey};
use staking_wallet_connector::provider::eth::Eip1193;
use staking_wallet_connector::provider::injected::{BtcExtension, InjectedProvider};
use staking_wallet_connector::provider::ledger::apdu::{
    self, ApduCommand, ApduResponse, INS_GET_EXTENDED_PUBKEY, INS_GET_MASTER_FINGERPRINT,
    INS_SIGN_MESSAGE, INS_SIGN_PSBT, SW_DENY, SW_INCORRECT_DATA, SW_INS_NOT_SUPPORTED,
};
use staking_wallet_connector::provider::ledger::policy::NUMS_INTERNAL_KEY;
use staking_wallet_connector::provider::ledger::{Transport, TransportError, WalletPolicy};
use staking_wallet_connector::provider::{BtcProvider, SignPsbtOptions};
use staking_wallet_connector::storage::account_storage::Clock;
use staking_wallet_connector::storage::keys::{bip86_account_path, derive_receive_keypair};
use staking_wallet_connector::storage::models::KeystoreKeys;
use staking_wallet_connector::types::{ChainId, InscriptionIdentifier};

/// BIP-39 test mnemonic used by the BIP-84/86 vectors
pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// BIP-86 first receive address of [`TEST_MNEMONIC`] on mainnet
pub const BIP86_FIRST_ADDRESS: &str =
    "bc1p5cyxnuxmeuwuvkwfem96lqzszd02n6xdcjrs20cac6yqjjwudpxqkedrcr";

/// BIP-86 account xpub of [`TEST_MNEMONIC`] on mainnet
pub const BIP86_ACCOUNT_XPUB: &str = "xpub6BgBgsespWvERF3LHQu6CnqdvfEvtMcQjYrcRzx53QJjSxarj2afYWcLteoGVky7D3UKDP9QyrLprQ3VCECoY49yfdDEHGCtMMj92pReUsQ";

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_mnemonic() -> bip39::Mnemonic {
    bip39::Mnemonic::parse(TEST_MNEMONIC).expect("Test mnemonic should parse")
}

pub fn test_keys(network: NetworkType) -> KeystoreKeys {
    KeystoreKeys::from_mnemonic(&Secp256k1::new(), &test_mnemonic(), network)
        .expect("Failed to derive test keys")
}

/// Compressed public key and taproot address of receive index `index`
pub fn test_account(network: NetworkType, index: u32) -> (String, String) {
    test_keys(network)
        .receive_account(&Secp256k1::new(), index, network)
        .expect("Failed to derive test account")
}

/// Sign every input of `psbt` the keys control (key path, then script path)
pub fn sign_all_inputs(keys: &KeystoreKeys, psbt: &mut Psbt) {
    let secp = Secp256k1::new();
    let keypair = derive_receive_keypair(&secp, &keys.account_xprv, 0).expect("Failed to derive key");
    for index in 0..psbt.inputs.len() {
        let signed = sign_input(&secp, psbt, index, &keypair, SignMode::Tweaked)
            .expect("Key-path signing failed");
        if !signed {
            sign_input(&secp, psbt, index, &keypair, SignMode::Untweaked)
                .expect("Script-path signing failed");
        }
    }
}

// ============================================================================
// PSBT fixtures
// ============================================================================

const FUNDING_SAT: u64 = 100_000;

fn dummy_outpoint(vout: u32) -> OutPoint {
    OutPoint {
        txid: Txid::from_byte_array([7u8; 32]),
        vout,
    }
}

fn unsigned_psbt(inputs: usize, destination: ScriptBuf) -> Psbt {
    let tx = Transaction {
        version: transaction::Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: (0..inputs as u32)
            .map(|vout| TxIn {
                previous_output: dummy_outpoint(vout),
                ..TxIn::default()
            })
            .collect(),
        output: vec![TxOut {
            value: Amount::from_sat(FUNDING_SAT * inputs as u64 - 1_000),
            script_pubkey: destination,
        }],
    };
    Psbt::from_unsigned_tx(tx).expect("Unsigned transaction should convert")
}

/// Taproot output script of receive index `index`
pub fn account_script(network: NetworkType, index: u32) -> ScriptBuf {
    let (_, address) = test_account(network, index);
    Address::from_str(&address)
        .expect("Test address should parse")
        .assume_checked()
        .script_pubkey()
}

/// Key-path spend of one input per entry, each locked to that receive index
pub fn key_spend_psbt(network: NetworkType, owners: &[u32]) -> Psbt {
    let mut psbt = unsigned_psbt(owners.len(), account_script(network, 0));
    for (input, owner) in psbt.inputs.iter_mut().zip(owners) {
        input.witness_utxo = Some(TxOut {
            value: Amount::from_sat(FUNDING_SAT),
            script_pubkey: account_script(network, *owner),
        });
    }
    psbt
}

/// Script-path spend of a NUMS-keyed output with a single
/// `<staker> OP_CHECKSIG` leaf for receive index 0
pub fn script_spend_psbt(network: NetworkType) -> Psbt {
    let secp = Secp256k1::new();
    let (public_key_hex, _) = test_account(network, 0);
    let staker = XOnlyPublicKey::from_str(&public_key_hex[2..]).expect("Valid x-only key");
    let nums = XOnlyPublicKey::from_str(NUMS_INTERNAL_KEY).expect("Valid NUMS key");

    let leaf = script::Builder::new()
        .push_x_only_key(&staker)
        .push_opcode(OP_CHECKSIG)
        .into_script();
    let spend_info = TaprootBuilder::new()
        .add_leaf(0, leaf.clone())
        .expect("Single leaf tree")
        .finalize(&secp, nums)
        .expect("Tree should finalize");
    let control_block = spend_info
        .control_block(&(leaf.clone(), LeafVersion::TapScript))
        .expect("Leaf is in the tree");

    let mut psbt = unsigned_psbt(1, account_script(network, 0));
    psbt.inputs[0].witness_utxo = Some(TxOut {
        value: Amount::from_sat(FUNDING_SAT),
        script_pubkey: ScriptBuf::new_p2tr(&secp, nums, spend_info.merkle_root()),
    });
    psbt.inputs[0]
        .tap_scripts
        .insert(control_block, (leaf, LeafVersion::TapScript));
    psbt
}

// ============================================================================
// Clock
// ============================================================================

/// Manually advanced millisecond clock
#[derive(Clone)]
pub struct TestClock {
    now: Arc<AtomicI64>,
}

impl TestClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    pub fn clock(&self) -> Clock {
        let now = Arc::clone(&self.now);
        Arc::new(move || now.load(Ordering::SeqCst))
    }
}

// ============================================================================
// Injected Bitcoin extension
// ============================================================================

/// Scriptable injected Bitcoin wallet
pub struct FakeExtension {
    pub addresses: Vec<String>,
    pub public_key: String,
    pub network: String,
    pub connect_error: Mutex<Option<String>>,
    pub sign_error: Mutex<Option<String>>,
    pub disconnect_error: Option<String>,
    /// Total inscriptions; `None` means every page comes back full
    pub inscription_total: Option<usize>,
    pub inscription_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub signed: Mutex<Vec<String>>,
}

impl FakeExtension {
    pub fn new(address: &str, public_key: &str, network: NetworkType) -> Self {
        Self {
            addresses: vec![address.to_string()],
            public_key: public_key.to_string(),
            network: network.to_string(),
            connect_error: Mutex::new(None),
            sign_error: Mutex::new(None),
            disconnect_error: None,
            inscription_total: Some(0),
            inscription_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            signed: Mutex::new(Vec::new()),
        }
    }

    /// Extension holding the first test account
    pub fn with_test_account(network: NetworkType) -> Self {
        let (public_key, address) = test_account(network, 0);
        Self::new(&address, &public_key, network)
    }

    pub fn failing_connect(self, message: &str) -> Self {
        *self.connect_error.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn failing_sign(self, message: &str) -> Self {
        *self.sign_error.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn failing_disconnect(mut self, message: &str) -> Self {
        self.disconnect_error = Some(message.to_string());
        self
    }

    pub fn with_inscriptions(mut self, total: Option<usize>) -> Self {
        self.inscription_total = total;
        self
    }

    pub fn reporting_network(mut self, network: &str) -> Self {
        self.network = network.to_string();
        self
    }

    fn check_sign(&self) -> Result<(), String> {
        match self.sign_error.lock().unwrap().clone() {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BtcExtension for FakeExtension {
    async fn request_accounts(&self) -> Result<Vec<String>, String> {
        if let Some(message) = self.connect_error.lock().unwrap().clone() {
            return Err(message);
        }
        Ok(self.addresses.clone())
    }

    async fn get_public_key(&self) -> Result<String, String> {
        Ok(self.public_key.clone())
    }

    async fn get_network(&self) -> Result<String, String> {
        Ok(self.network.clone())
    }

    async fn sign_psbt(
        &self,
        psbt_hex: &str,
        _options: Option<&SignPsbtOptions>,
    ) -> Result<String, String> {
        self.check_sign()?;
        self.signed.lock().unwrap().push(psbt_hex.to_string());
        Ok(psbt_hex.to_string())
    }

    async fn sign_psbts(
        &self,
        psbts_hexes: &[String],
        _options: Option<&[SignPsbtOptions]>,
    ) -> Result<Vec<String>, String> {
        self.check_sign()?;
        self.signed.lock().unwrap().extend(psbts_hexes.iter().cloned());
        Ok(psbts_hexes.to_vec())
    }

    async fn sign_message(&self, message: &str, method: SignMessageType) -> Result<String, String> {
        self.check_sign()?;
        Ok(format!("{}:{}", method, message))
    }

    async fn get_inscriptions(
        &self,
        cursor: usize,
        size: usize,
    ) -> Result<Vec<InscriptionIdentifier>, String> {
        self.inscription_calls.fetch_add(1, Ordering::SeqCst);
        let end = match self.inscription_total {
            Some(total) => total.min(cursor + size),
            None => cursor + size,
        };
        Ok((cursor..end)
            .map(|i| InscriptionIdentifier {
                txid: format!("{:064x}", i),
                vout: 0,
            })
            .collect())
    }

    async fn disconnect(&self) -> Result<(), String> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        match &self.disconnect_error {
            Some(message) => Err(message.clone()),
            None => Ok(()),
        }
    }
}

// ============================================================================
// APDU device simulator
// ============================================================================

/// Hardware signer simulator speaking the APDU protocol
///
/// Holds the [`TEST_MNEMONIC`] keystore and signs like the device would.
pub struct DeviceSimulator {
    keys: KeystoreKeys,
    network: NetworkType,
    secp: Secp256k1<All>,
    pending: Mutex<Vec<u8>>,
    /// Successfully decoded commands, in order
    pub commands: Mutex<Vec<ApduCommand>>,
    /// Every call to `exchange`, including injected failures
    pub attempts: AtomicUsize,
    io_failures: AtomicU32,
    deny_signing: AtomicBool,
    pub last_policy: Mutex<Option<WalletPolicy>>,
}

impl DeviceSimulator {
    pub fn new(network: NetworkType) -> Self {
        Self {
            keys: test_keys(network),
            network,
            secp: Secp256k1::new(),
            pending: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            io_failures: AtomicU32::new(0),
            deny_signing: AtomicBool::new(false),
            last_policy: Mutex::new(None),
        }
    }

    /// Fail the next `count` exchanges with an I/O error
    pub fn fail_next(&self, count: u32) {
        self.io_failures.store(count, Ordering::SeqCst);
    }

    pub fn deny_signing(&self) {
        self.deny_signing.store(true, Ordering::SeqCst);
    }

    pub fn keys(&self) -> &KeystoreKeys {
        &self.keys
    }

    pub fn command_count(&self) -> usize {
        self.commands.lock().unwrap().len()
    }

    fn handle(&self, command: &ApduCommand) -> ApduResponse {
        let is_signing = matches!(command.ins, INS_SIGN_PSBT | INS_SIGN_MESSAGE);
        if is_signing {
            let mut pending = self.pending.lock().unwrap();
            pending.extend_from_slice(&command.data);
            if command.has_more() {
                return ApduResponse::ok(Vec::new());
            }
        }

        match command.ins {
            INS_GET_MASTER_FINGERPRINT => {
                ApduResponse::ok(hex::decode(&self.keys.master_fingerprint).unwrap())
            }
            INS_GET_EXTENDED_PUBKEY => {
                let (path, _) = apdu::decode_path(&command.data).unwrap();
                let expected = DerivationPath::from_str(&bip86_account_path(self.network)).unwrap();
                if path != expected {
                    return ApduResponse::status(SW_INCORRECT_DATA);
                }
                ApduResponse::ok(self.keys.account_xpub.to_string().into_bytes())
            }
            INS_SIGN_PSBT => {
                let payload = std::mem::take(&mut *self.pending.lock().unwrap());
                if self.deny_signing.load(Ordering::SeqCst) {
                    return ApduResponse::status(SW_DENY);
                }
                let (policy, psbt_bytes) = apdu::split_sign_psbt(&payload).unwrap();
                *self.last_policy.lock().unwrap() = Some(WalletPolicy::from_bytes(policy).unwrap());

                let mut psbt = Psbt::deserialize(psbt_bytes).unwrap();
                sign_all_inputs(&self.keys, &mut psbt);
                ApduResponse::ok(psbt.serialize())
            }
            INS_SIGN_MESSAGE => {
                let payload = std::mem::take(&mut *self.pending.lock().unwrap());
                if self.deny_signing.load(Ordering::SeqCst) {
                    return ApduResponse::status(SW_DENY);
                }
                let (_path, message) = apdu::split_sign_message(&payload).unwrap();
                let keypair = derive_receive_keypair(&self.secp, &self.keys.account_xprv, 0).unwrap();
                let signature = sign_ecdsa_message(
                    &self.secp,
                    &keypair.secret_key(),
                    std::str::from_utf8(message).unwrap(),
                );
                ApduResponse::ok(STANDARD.decode(signature).unwrap())
            }
            _ => ApduResponse::status(SW_INS_NOT_SUPPORTED),
        }
    }
}

#[async_trait]
impl Transport for DeviceSimulator {
    async fn exchange(&self, raw: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let remaining = self.io_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.io_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Io("USB transfer stalled".to_string()));
        }

        let command = ApduCommand::decode(raw)?;
        self.commands.lock().unwrap().push(command.clone());
        Ok(self.handle(&command).encode())
    }
}

// ============================================================================
// QR channel
// ============================================================================

/// What the fake scanner does on the next `scan`
pub enum ScanStep {
    Payload(String),
    /// Sign the most recently displayed request with the test keys
    SignDisplayed,
    Fail(QrError),
    /// Never completes
    Hang,
}

pub struct FakeQrChannel {
    keys: KeystoreKeys,
    pub displayed: Mutex<Vec<String>>,
    steps: Mutex<VecDeque<ScanStep>>,
}

impl FakeQrChannel {
    pub fn new(network: NetworkType, steps: Vec<ScanStep>) -> Self {
        Self {
            keys: test_keys(network),
            displayed: Mutex::new(Vec::new()),
            steps: Mutex::new(steps.into()),
        }
    }

    /// Account export QR of the test keystore
    pub fn account_export(network: NetworkType) -> String {
        let keys = test_keys(network);
        json!({
            "masterFingerprint": keys.master_fingerprint,
            "xpub": keys.account_xpub.to_string(),
            "path": bip86_account_path(network),
        })
        .to_string()
    }
}

#[async_trait]
impl QrChannel for FakeQrChannel {
    async fn display(&self, payload: &str) -> Result<(), QrError> {
        self.displayed.lock().unwrap().push(payload.to_string());
        Ok(())
    }

    async fn scan(&self) -> Result<String, QrError> {
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(ScanStep::Payload(payload)) => Ok(payload),
            Some(ScanStep::SignDisplayed) => {
                let last = self
                    .displayed
                    .lock()
                    .unwrap()
                    .last()
                    .cloned()
                    .ok_or_else(|| QrError::Scan("nothing displayed".to_string()))?;
                let AirGappedRequest::SignPsbt { psbt_hex } =
                    serde_json::from_str::<AirGappedRequest>(&last)
                        .map_err(|e| QrError::Read(e.to_string()))?;
                let mut psbt = psbt_from_hex(&psbt_hex).map_err(|e| QrError::Read(e.to_string()))?;
                sign_all_inputs(&self.keys, &mut psbt);
                Ok(psbt_to_hex(&psbt))
            }
            Some(ScanStep::Fail(error)) => Err(error),
            Some(ScanStep::Hang) | None => std::future::pending().await,
        }
    }
}

// ============================================================================
// Cosmos extension
// ============================================================================

pub struct FakeCosmosExtension {
    pub key: CosmosKey,
    pub enabled: Mutex<Vec<String>>,
    pub reject_signing: bool,
}

impl FakeCosmosExtension {
    pub fn new(address: &str, public_key_hex: &str) -> Self {
        Self {
            key: CosmosKey {
                bech32_address: address.to_string(),
                public_key_hex: public_key_hex.to_string(),
            },
            enabled: Mutex::new(Vec::new()),
            reject_signing: false,
        }
    }
}

#[async_trait]
impl CosmosExtension for FakeCosmosExtension {
    async fn enable(&self, chain_id: &str) -> Result<(), String> {
        self.enabled.lock().unwrap().push(chain_id.to_string());
        Ok(())
    }

    async fn get_key(&self, _chain_id: &str) -> Result<CosmosKey, String> {
        Ok(self.key.clone())
    }

    async fn sign_arbitrary(
        &self,
        chain_id: &str,
        signer: &str,
        data: &str,
    ) -> Result<String, String> {
        if self.reject_signing {
            return Err("Request rejected".to_string());
        }
        Ok(format!("{}|{}|{}", chain_id, signer, data))
    }
}

// ============================================================================
// EIP-1193
// ============================================================================

pub struct FakeEthereum {
    pub accounts: Vec<String>,
    pub chain_id: u64,
    pub reject_signing: bool,
    pub requests: Mutex<Vec<(String, Value)>>,
}

impl FakeEthereum {
    pub fn new(account: &str, chain_id: u64) -> Self {
        Self {
            accounts: vec![account.to_string()],
            chain_id,
            reject_signing: false,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Eip1193 for FakeEthereum {
    async fn request(&self, method: &str, params: Value) -> Result<Value, String> {
        self.requests
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));

        match method {
            "eth_requestAccounts" | "eth_accounts" => Ok(json!(self.accounts)),
            "eth_chainId" => Ok(json!(format!("0x{:x}", self.chain_id))),
            "personal_sign" => {
                if self.reject_signing {
                    return Err("User denied message signature".to_string());
                }
                Ok(json!(format!("0x{}", "ab".repeat(65))))
            }
            other => Err(format!("unsupported method {}", other)),
        }
    }
}

/// Network from a string, for table-driven tests
pub fn network(name: &str) -> NetworkType {
    NetworkType::from_str(name).expect("Invalid network name")
}

// ============================================================================
// Connector helpers
// ============================================================================

/// Provider context for `chain` on the default config of `network`
pub fn context(chain: ChainId, network: NetworkType) -> ProviderContext {
    let config = GlobalConfig::default_for(network);
    ProviderContext {
        chain,
        config: config.chain(chain).cloned().expect("Chain missing from defaults"),
        shared: Arc::new(config.shared.clone()),
    }
}

/// Injected BTC wallet descriptor over a shared fake extension
pub fn injected_btc_wallet(
    id: &str,
    name: &str,
    extension: Arc<FakeExtension>,
    networks: Vec<NetworkType>,
) -> WalletMetadata<dyn BtcProvider> {
    let wallet_name = name.to_string();
    WalletMetadata::new(
        id,
        name,
        networks,
        Arc::new(move |context: &ProviderContext| -> Result<Arc<dyn BtcProvider>, WalletError> {
            let provider: Arc<dyn BtcProvider> = Arc::new(InjectedProvider::new(
                wallet_name.clone(),
                Arc::clone(&extension),
                context.network(),
            ));
            Ok(provider)
        }),
    )
}

/// Connector events flattened to strings, in emission order
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(&self) -> ConnectorListener {
        let events = Arc::clone(&self.events);
        Arc::new(move |event: &ConnectorEvent| {
            let line = match event {
                ConnectorEvent::Connecting { wallet_id } => format!("connecting:{}", wallet_id),
                ConnectorEvent::Connect { wallet_id, account } => {
                    format!("connect:{}:{}", wallet_id, account.address)
                }
                ConnectorEvent::Disconnect { wallet_id } => format!("disconnect:{}", wallet_id),
                ConnectorEvent::Error(error) => format!("error:{}", error),
            };
            events.lock().unwrap().push(line);
        })
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Event kinds only (text before the first ':')
    pub fn kinds(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|e| e.split(':').next().unwrap_or_default().to_string())
            .collect()
    }
}
