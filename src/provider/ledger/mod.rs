//! Hardware signer over an APDU transport
//!
//! The device exposes its master fingerprint and account xpub; the
//! receive address is derived locally at `<account>/0/0`. Signing sends a
//! wallet policy together with the PSBT. Policies are built before any
//! device communication so missing contracts fail fast.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, Xpub};
use bitcoin::psbt::Psbt;
use bitcoin::taproot::TapLeafHash;
use bitcoin::XOnlyPublicKey;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::bitcoin::address::derive_p2tr_from_extended_key;
use crate::bitcoin::psbt::{finalize_all, psbt_from_hex, psbt_to_hex, script_commits_to_key};
use crate::bitcoin::{bip322, Bip322Error, SignMessageType};
use crate::config::NetworkType;
use crate::error::WalletError;
use crate::provider::{
    AccountChangedCallback, BtcProvider, IProvider, ListenerId, ProviderEvent, SignPsbtOptions,
};
use crate::storage::keys::bip86_account_path;
use crate::types::{Account, InscriptionIdentifier};

pub mod apdu;
pub mod policy;

pub use policy::{build_policy, default_policy, PolicyError, StakerKey, WalletPolicy};

use apdu::{
    ApduCommand, ApduResponse, INS_GET_EXTENDED_PUBKEY, INS_GET_MASTER_FINGERPRINT,
    INS_SIGN_MESSAGE, INS_SIGN_PSBT, SW_DENY, SW_OK,
};

/// Transport failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Device communication failed: {0}")]
    Io(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Device returned status 0x{0:04X}")]
    Status(u16),

    #[error("Malformed APDU: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Communication failures are retried; device answers are not
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Io(_) | TransportError::Disconnected)
    }
}

/// Raw APDU exchange with a device
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(&self, apdu: &[u8]) -> Result<Vec<u8>, TransportError>;

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Fixed-delay retry for transport exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

struct DeviceSession {
    account: Account,
    staker: StakerKey,
}

/// [`BtcProvider`] for an APDU hardware signer
pub struct LedgerProvider<T: Transport> {
    name: String,
    transport: Arc<T>,
    network: NetworkType,
    retry: RetryPolicy,
    session: Mutex<Option<Arc<DeviceSession>>>,
}

impl<T: Transport> LedgerProvider<T> {
    pub fn new(name: impl Into<String>, transport: Arc<T>, network: NetworkType) -> Self {
        Self::with_retry(name, transport, network, RetryPolicy::default())
    }

    pub fn with_retry(
        name: impl Into<String>,
        transport: Arc<T>,
        network: NetworkType,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            network,
            retry,
            session: Mutex::new(None),
        }
    }

    /// Staker key of the connected device
    pub fn staker_key(&self) -> Result<StakerKey, WalletError> {
        Ok(self.require_session()?.staker.clone())
    }

    fn require_session(&self) -> Result<Arc<DeviceSession>, WalletError> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| WalletError::WalletNotConnected {
                wallet: self.name.clone(),
            })
    }

    fn account_path(&self) -> Result<DerivationPath, WalletError> {
        DerivationPath::from_str(&bip86_account_path(self.network))
            .map_err(|e| WalletError::ConnectionFailed {
                wallet: self.name.clone(),
                reason: e.to_string(),
            })
    }

    /// Exchange one APDU, retrying communication failures
    async fn exchange(&self, command: &ApduCommand) -> Result<Vec<u8>, WalletError> {
        let bytes = command.encode();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.transport.exchange(&bytes).await {
                Ok(raw) => {
                    let response = ApduResponse::parse(&raw)?;
                    return match response.status {
                        SW_OK => Ok(response.data),
                        SW_DENY => Err(WalletError::SigningRejected {
                            wallet: self.name.clone(),
                        }),
                        status => Err(TransportError::Status(status).into()),
                    };
                }
                Err(e) if e.is_retryable() && attempt < self.retry.attempts => {
                    log::warn!(
                        "{}: exchange failed (attempt {}/{}): {}",
                        self.name,
                        attempt,
                        self.retry.attempts,
                        e
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(e) => {
                    log::warn!("{}: giving up after {} attempts: {}", self.name, attempt, e);
                    return Err(e.into());
                }
            }
        }
    }

    /// Send a payload in chunks; the device answers on the last chunk
    async fn send_chunked(&self, ins: u8, payload: &[u8]) -> Result<Vec<u8>, WalletError> {
        let mut response = Vec::new();
        for command in apdu::chunk(ins, payload) {
            response = self.exchange(&command).await?;
        }
        Ok(response)
    }

    async fn sign_with_policy(
        &self,
        mut psbt: Psbt,
        policy: &WalletPolicy,
        staker: &StakerKey,
        indexes: Option<Vec<usize>>,
    ) -> Result<Psbt, WalletError> {
        let indexes = indexes.unwrap_or_else(|| (0..psbt.inputs.len()).collect());
        attach_key_origins(&mut psbt, staker, &indexes)?;

        let payload = apdu::frame_sign_psbt(&policy.to_bytes()?, &psbt.serialize());
        log::debug!(
            "{}: signing PSBT with policy '{}' ({} bytes)",
            self.name,
            policy.descriptor_template,
            payload.len()
        );

        let signed = self.send_chunked(INS_SIGN_PSBT, &payload).await?;
        Psbt::deserialize(&signed).map_err(|e| WalletError::SignatureExtraction {
            wallet: self.name.clone(),
            reason: e.to_string(),
        })
    }
}

/// Full path of the receive key: the account path plus `/0/0`
pub fn receive_key_path(account_path: &DerivationPath) -> DerivationPath {
    account_path.extend([ChildNumber::Normal { index: 0 }, ChildNumber::Normal { index: 0 }])
}

/// Attach the staker's taproot key origin to the given inputs
///
/// Leaf hashes list every tapscript on the input that contains the key.
/// Key-path inputs locked to the staker's own output also get their
/// internal key.
pub fn attach_key_origins(
    psbt: &mut Psbt,
    staker: &StakerKey,
    indexes: &[usize],
) -> Result<(), WalletError> {
    let path = receive_key_path(&staker.account_path);
    let secp = crate::bitcoin::address::init_ecc();
    let own_script = bitcoin::ScriptBuf::new_p2tr(secp, staker.x_only, None);

    for &index in indexes {
        let input = psbt
            .inputs
            .get_mut(index)
            .ok_or(crate::bitcoin::PsbtError::InputOutOfRange(index))?;

        let leaves: Vec<TapLeafHash> = input
            .tap_scripts
            .values()
            .filter(|(script, _)| script_commits_to_key(script, &staker.x_only))
            .map(|(script, version)| TapLeafHash::from_script(script, *version))
            .collect();

        let spends_own_output = input
            .witness_utxo
            .as_ref()
            .map(|utxo| utxo.script_pubkey == own_script)
            .unwrap_or(false);
        if spends_own_output && input.tap_internal_key.is_none() {
            input.tap_internal_key = Some(staker.x_only);
        }

        if spends_own_output || !leaves.is_empty() {
            input
                .tap_key_origins
                .insert(staker.x_only, (leaves, (staker.fingerprint, path.clone())));
        }
    }
    Ok(())
}

#[async_trait]
impl<T: Transport + 'static> IProvider for LedgerProvider<T> {
    async fn connect_wallet(&self) -> Result<(), WalletError> {
        let rejected_as_connection = |e: WalletError| match e {
            WalletError::SigningRejected { wallet } => WalletError::ConnectionRejected { wallet },
            other => other,
        };

        let fingerprint_bytes = self
            .exchange(&ApduCommand::new(INS_GET_MASTER_FINGERPRINT, 0, 0, Vec::new()))
            .await
            .map_err(rejected_as_connection)?;
        let fingerprint: [u8; 4] =
            fingerprint_bytes
                .as_slice()
                .try_into()
                .map_err(|_| WalletError::ConnectionFailed {
                    wallet: self.name.clone(),
                    reason: format!("fingerprint has {} bytes", fingerprint_bytes.len()),
                })?;

        let account_path = self.account_path()?;
        let xpub_bytes = self
            .exchange(&ApduCommand::new(
                INS_GET_EXTENDED_PUBKEY,
                0,
                0,
                apdu::encode_path(&account_path),
            ))
            .await
            .map_err(rejected_as_connection)?;
        let xpub_str = String::from_utf8(xpub_bytes).map_err(|e| WalletError::ConnectionFailed {
            wallet: self.name.clone(),
            reason: format!("xpub is not UTF-8: {}", e),
        })?;
        let account_xpub = Xpub::from_str(&xpub_str).map_err(|e| WalletError::ConnectionFailed {
            wallet: self.name.clone(),
            reason: format!("invalid xpub: {}", e),
        })?;

        let derived = derive_p2tr_from_extended_key(&xpub_str, "m/0/0", self.network)?;
        let x_only = XOnlyPublicKey::from_str(&derived.public_key_hex[2..])
            .map_err(|e| crate::bitcoin::AddressError::InvalidPublicKey(e.to_string()))?;

        log::info!(
            "{}: connected device {} ({})",
            self.name,
            Fingerprint::from(fingerprint),
            derived.address
        );

        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(DeviceSession {
            account: Account {
                address: derived.address,
                public_key_hex: derived.public_key_hex,
            },
            staker: StakerKey {
                fingerprint: Fingerprint::from(fingerprint),
                account_path,
                account_xpub,
                x_only,
            },
        }));
        Ok(())
    }

    async fn get_address(&self) -> Result<String, WalletError> {
        Ok(self.require_session()?.account.address.clone())
    }

    async fn get_public_key_hex(&self) -> Result<String, WalletError> {
        Ok(self.require_session()?.account.public_key_hex.clone())
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.transport.close().await?;
        Ok(())
    }

    fn get_wallet_provider_name(&self) -> String {
        self.name.clone()
    }
}

#[async_trait]
impl<T: Transport + 'static> BtcProvider for LedgerProvider<T> {
    async fn sign_psbt(
        &self,
        psbt_hex: &str,
        options: Option<&SignPsbtOptions>,
    ) -> Result<String, WalletError> {
        let session = self.require_session()?;
        if psbt_hex.trim().is_empty() {
            return Err(WalletError::PsbtHexRequired);
        }

        let policy = match options.and_then(|o| o.action) {
            Some(action) => {
                let contracts = options
                    .and_then(|o| o.contracts.as_deref())
                    .unwrap_or_default();
                build_policy(action, contracts, &session.staker)?
            }
            None => default_policy(&session.staker),
        };

        let psbt = psbt_from_hex(psbt_hex)?;
        let indexes = options
            .and_then(|o| o.to_sign_inputs.as_ref())
            .map(|inputs| inputs.iter().map(|input| input.index).collect());

        let mut signed = self
            .sign_with_policy(psbt, &policy, &session.staker, indexes)
            .await?;

        if options.map(|o| o.auto_finalized).unwrap_or(true) {
            finalize_all(&mut signed)?;
        }
        Ok(psbt_to_hex(&signed))
    }

    async fn get_network(&self) -> Result<NetworkType, WalletError> {
        self.require_session()?;
        Ok(self.network)
    }

    async fn sign_message(
        &self,
        message: &str,
        method: SignMessageType,
    ) -> Result<String, WalletError> {
        let session = self.require_session()?;

        match method {
            SignMessageType::Bip322Simple => {
                let psbt = bip322::prepare_to_sign(
                    message,
                    &session.account.address,
                    &session.account.public_key_hex,
                    self.network,
                )?;
                let policy = default_policy(&session.staker);
                let signed = self
                    .sign_with_policy(psbt, &policy, &session.staker, Some(vec![0]))
                    .await?;

                bip322::extract_signature(signed).map_err(|e| match e {
                    Bip322Error::SignatureExtraction(reason) => WalletError::SignatureExtraction {
                        wallet: self.name.clone(),
                        reason,
                    },
                    other => other.into(),
                })
            }
            SignMessageType::Ecdsa => {
                let path = receive_key_path(&session.staker.account_path);
                let payload = apdu::frame_sign_message(&path, message.as_bytes());
                let signature = self.send_chunked(INS_SIGN_MESSAGE, &payload).await?;
                if signature.len() != 65 {
                    return Err(WalletError::SignatureExtraction {
                        wallet: self.name.clone(),
                        reason: format!("expected 65 signature bytes, got {}", signature.len()),
                    });
                }
                Ok(STANDARD.encode(signature))
            }
        }
    }

    async fn get_inscriptions(&self) -> Result<Vec<InscriptionIdentifier>, WalletError> {
        Err(WalletError::NotImplemented {
            wallet: self.name.clone(),
            feature: "inscriptions".to_string(),
        })
    }

    // The device never switches accounts on its own
    fn on(
        &self,
        _event: ProviderEvent,
        _callback: AccountChangedCallback,
    ) -> Result<ListenerId, WalletError> {
        Ok(0)
    }

    fn off(&self, _event: ProviderEvent, _listener: ListenerId) -> Result<(), WalletError> {
        Ok(())
    }
}
