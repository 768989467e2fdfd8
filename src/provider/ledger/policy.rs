//! Wallet policies for staking transactions
//!
//! A hardware signer only signs script-path spends it can show the user, so
//! every staking action is described as a wallet policy: a descriptor
//! template over numbered key placeholders plus the key list. Key `@0` is
//! the unspendable NUMS internal key, `@1` the staker's account key
//! (`[fingerprint/path]xpub`), followed by finality provider keys and the
//! sorted covenant keys.

use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, Xpub};
use bitcoin::XOnlyPublicKey;
use std::str::FromStr;

use crate::provider::options::{ContractId, SigningAction, SigningContract};

/// BIP-341 NUMS point used as the unspendable internal key
pub const NUMS_INTERNAL_KEY: &str =
    "50929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0";

const POLICY_VERSION: u8 = 0x02;

/// Policy construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("Missing signing contract: {0}")]
    MissingContract(ContractId),

    #[error("Invalid parameter '{param}' in {contract} contract: {reason}")]
    InvalidParam {
        contract: ContractId,
        param: String,
        reason: String,
    },

    #[error("Invalid public key: {0}")]
    InvalidKey(String),

    #[error("Malformed policy bytes: {0}")]
    Malformed(String),
}

/// Staker key as known to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakerKey {
    pub fingerprint: Fingerprint,
    /// Account-level path (`m/86'/coin'/0'`)
    pub account_path: DerivationPath,
    pub account_xpub: Xpub,
    /// Key at `<account>/0/0`
    pub x_only: XOnlyPublicKey,
}

impl StakerKey {
    /// Key information string `[fingerprint/path]xpub`
    pub fn key_info(&self) -> String {
        let children: &[ChildNumber] = self.account_path.as_ref();
        let path: Vec<String> = children.iter().map(format_child).collect();
        if path.is_empty() {
            format!("[{}]{}", self.fingerprint, self.account_xpub)
        } else {
            format!("[{}/{}]{}", self.fingerprint, path.join("/"), self.account_xpub)
        }
    }
}

fn format_child(child: &ChildNumber) -> String {
    match child {
        ChildNumber::Normal { index } => index.to_string(),
        ChildNumber::Hardened { index } => format!("{}'", index),
    }
}

/// Slashing output terms shown on the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashingTerms {
    pub pk_script_hex: String,
    pub fee_sat: u64,
}

/// Wallet policy handed to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletPolicy {
    pub action: Option<SigningAction>,
    pub name: String,
    pub descriptor_template: String,
    pub keys: Vec<String>,
    /// x-only lowercase hex, sorted
    pub covenant_public_keys: Vec<String>,
    pub covenant_threshold: u64,
    pub timelock: u64,
    pub slashing: Option<SlashingTerms>,
}

/// Contracts an action needs, in lookup order
pub fn required_contracts(action: SigningAction) -> &'static [ContractId] {
    match action {
        SigningAction::Staking => &[ContractId::Staking],
        SigningAction::Unbonding => &[ContractId::Staking, ContractId::Unbonding],
        SigningAction::Slashing => &[
            ContractId::Staking,
            ContractId::Slashing,
            ContractId::SlashingBurn,
        ],
        SigningAction::UnbondingSlashing => &[
            ContractId::Unbonding,
            ContractId::Slashing,
            ContractId::SlashingBurn,
        ],
        SigningAction::Withdraw => &[ContractId::Withdraw],
    }
}

fn find_contract(
    contracts: &[SigningContract],
    id: ContractId,
) -> Result<&SigningContract, PolicyError> {
    contracts
        .iter()
        .find(|contract| contract.id == id)
        .ok_or(PolicyError::MissingContract(id))
}

/// Normalize a public key to x-only lowercase hex
///
/// Accepts 64-char x-only or 66-char compressed keys.
pub fn normalize_x_only(key: &str) -> Result<String, PolicyError> {
    let lowered = key.trim().to_lowercase();
    if !lowered.is_ascii() {
        return Err(PolicyError::InvalidKey(key.to_string()));
    }
    let x_only = match lowered.len() {
        64 => lowered,
        66 => lowered[2..].to_string(),
        _ => return Err(PolicyError::InvalidKey(key.to_string())),
    };
    XOnlyPublicKey::from_str(&x_only).map_err(|e| PolicyError::InvalidKey(e.to_string()))?;
    Ok(x_only)
}

/// Covenant keys normalized and sorted lexicographically
pub fn sorted_covenant_keys(keys: &[String]) -> Result<Vec<String>, PolicyError> {
    let mut normalized = keys
        .iter()
        .map(|key| normalize_x_only(key))
        .collect::<Result<Vec<_>, _>>()?;
    normalized.sort();
    Ok(normalized)
}

/// Default key-path policy `tr(@0/**)` over the staker account
pub fn default_policy(staker: &StakerKey) -> WalletPolicy {
    WalletPolicy {
        action: None,
        name: String::new(),
        descriptor_template: "tr(@0/**)".to_string(),
        keys: vec![staker.key_info()],
        covenant_public_keys: Vec::new(),
        covenant_threshold: 0,
        timelock: 0,
        slashing: None,
    }
}

/// Build the policy for a staking action
///
/// Fails with `MissingContract` before touching anything else when a
/// required contract is absent.
pub fn build_policy(
    action: SigningAction,
    contracts: &[SigningContract],
    staker: &StakerKey,
) -> Result<WalletPolicy, PolicyError> {
    let required = required_contracts(action)
        .iter()
        .map(|id| find_contract(contracts, *id))
        .collect::<Result<Vec<_>, _>>()?;

    for contract in &required {
        check_staker(contract, staker)?;
    }

    let policy = match action {
        SigningAction::Staking => {
            let staking = required[0];
            let scripts = ScriptParams::from_contract(staking)?;
            let timelock = staking.staking_duration()?;
            scripts.policy(action, "Staking", scripts.staking_tree(timelock), timelock, None, staker)
        }
        SigningAction::Unbonding => {
            let (staking, unbonding) = (required[0], required[1]);
            let scripts = ScriptParams::from_contract(staking)?;
            let template = scripts.staking_tree(staking.staking_duration()?);
            scripts.policy(
                action,
                "Unbonding",
                template,
                unbonding.unbonding_time_blocks()?,
                None,
                staker,
            )
        }
        SigningAction::Slashing => {
            let (staking, slashing, burn) = (required[0], required[1], required[2]);
            let scripts = ScriptParams::from_contract(staking)?;
            let template = scripts.staking_tree(staking.staking_duration()?);
            scripts.policy(
                action,
                "Consent to slashing",
                template,
                slashing.unbonding_time_blocks()?,
                Some(slashing_terms(slashing, burn)?),
                staker,
            )
        }
        SigningAction::UnbondingSlashing => {
            let (unbonding, slashing, burn) = (required[0], required[1], required[2]);
            let scripts = ScriptParams::from_contract(unbonding)?;
            let timelock = unbonding.unbonding_time_blocks()?;
            scripts.policy(
                action,
                "Consent to unbonding slashing",
                scripts.unbonding_tree(timelock),
                slashing.unbonding_time_blocks()?,
                Some(slashing_terms(slashing, burn)?),
                staker,
            )
        }
        SigningAction::Withdraw => {
            let withdraw = required[0];
            let timelock = withdraw.timelock_blocks()?;
            WalletPolicy {
                action: Some(action),
                name: "Withdraw".to_string(),
                descriptor_template: format!("tr(@0,{})", timelock_leaf(timelock)),
                keys: vec![NUMS_INTERNAL_KEY.to_string(), staker.key_info()],
                covenant_public_keys: Vec::new(),
                covenant_threshold: 0,
                timelock,
                slashing: None,
            }
        }
    };

    log::debug!(
        "Built {} policy: {}",
        action,
        policy.descriptor_template
    );
    Ok(policy)
}

fn check_staker(contract: &SigningContract, staker: &StakerKey) -> Result<(), PolicyError> {
    if !contract.params.contains_key("stakerPk") {
        return Ok(());
    }
    let declared = normalize_x_only(contract.staker_public_key()?)?;
    if declared != staker.x_only.to_string() {
        return Err(PolicyError::InvalidParam {
            contract: contract.id,
            param: "stakerPk".to_string(),
            reason: "does not match the device key".to_string(),
        });
    }
    Ok(())
}

fn slashing_terms(
    slashing: &SigningContract,
    burn: &SigningContract,
) -> Result<SlashingTerms, PolicyError> {
    let pk_script_hex = burn.slashing_pk_script_hex()?.to_lowercase();
    if hex::decode(&pk_script_hex).is_err() {
        return Err(PolicyError::InvalidParam {
            contract: burn.id,
            param: "slashingPkScriptHex".to_string(),
            reason: "expected hex".to_string(),
        });
    }
    Ok(SlashingTerms {
        pk_script_hex,
        fee_sat: slashing.slashing_fee_sat()?,
    })
}

fn timelock_leaf(blocks: u64) -> String {
    format!("and_v(v:pk(@1/**),older({}))", blocks)
}

/// Finality provider and covenant parameters shared by the script leaves
struct ScriptParams {
    finality_providers: Vec<String>,
    covenants: Vec<String>,
    threshold: u64,
}

impl ScriptParams {
    fn from_contract(contract: &SigningContract) -> Result<Self, PolicyError> {
        let finality_providers = contract
            .finality_provider_keys()?
            .iter()
            .map(|key| normalize_x_only(key))
            .collect::<Result<Vec<_>, _>>()?;
        if finality_providers.is_empty() {
            return Err(PolicyError::InvalidParam {
                contract: contract.id,
                param: "finalityProviders".to_string(),
                reason: "at least one finality provider is required".to_string(),
            });
        }

        let covenants = sorted_covenant_keys(&contract.covenant_keys()?)?;
        let threshold = contract.covenant_threshold()?;
        if threshold == 0 || threshold as usize > covenants.len() {
            return Err(PolicyError::InvalidParam {
                contract: contract.id,
                param: "covenantThreshold".to_string(),
                reason: format!(
                    "threshold {} out of range for {} covenant keys",
                    threshold,
                    covenants.len()
                ),
            });
        }

        Ok(Self {
            finality_providers,
            covenants,
            threshold,
        })
    }

    fn first_covenant_placeholder(&self) -> usize {
        2 + self.finality_providers.len()
    }

    fn covenant_multisig(&self) -> String {
        let start = self.first_covenant_placeholder();
        let refs: Vec<String> = (start..start + self.covenants.len())
            .map(|i| format!("@{}", i))
            .collect();
        format!("multi_a({},{})", self.threshold, refs.join(","))
    }

    fn finality_provider_check(&self) -> String {
        if self.finality_providers.len() == 1 {
            "v:pk(@2)".to_string()
        } else {
            let refs: Vec<String> = (2..2 + self.finality_providers.len())
                .map(|i| format!("@{}", i))
                .collect();
            format!("v:multi_a(1,{})", refs.join(","))
        }
    }

    fn unbonding_leaf(&self) -> String {
        format!("and_v(v:pk(@1/**),{})", self.covenant_multisig())
    }

    fn slashing_leaf(&self) -> String {
        format!(
            "and_v(v:pk(@1/**),and_v({},{}))",
            self.finality_provider_check(),
            self.covenant_multisig()
        )
    }

    fn staking_tree(&self, timelock: u64) -> String {
        format!(
            "tr(@0,{{{},{{{},{}}}}})",
            timelock_leaf(timelock),
            self.unbonding_leaf(),
            self.slashing_leaf()
        )
    }

    fn unbonding_tree(&self, timelock: u64) -> String {
        format!(
            "tr(@0,{{{},{}}})",
            timelock_leaf(timelock),
            self.slashing_leaf()
        )
    }

    fn policy(
        &self,
        action: SigningAction,
        name: &str,
        descriptor_template: String,
        timelock: u64,
        slashing: Option<SlashingTerms>,
        staker: &StakerKey,
    ) -> WalletPolicy {
        let mut keys = vec![NUMS_INTERNAL_KEY.to_string(), staker.key_info()];
        keys.extend(self.finality_providers.iter().cloned());
        keys.extend(self.covenants.iter().cloned());

        WalletPolicy {
            action: Some(action),
            name: name.to_string(),
            descriptor_template,
            keys,
            covenant_public_keys: self.covenants.clone(),
            covenant_threshold: self.threshold,
            timelock,
            slashing,
        }
    }
}

impl WalletPolicy {
    /// Device serialization
    ///
    /// `version | name | template | keys | timelock | threshold | slashing`,
    /// strings length-prefixed (u8, template u16 big-endian). Fails when a
    /// field does not fit its wire width.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PolicyError> {
        let mut bytes = vec![POLICY_VERSION];
        push_short(&mut bytes, "name", self.name.as_bytes())?;

        let template = self.descriptor_template.as_bytes();
        let template_len = narrow::<u16>("descriptor template", template.len() as u64)?;
        bytes.extend_from_slice(&template_len.to_be_bytes());
        bytes.extend_from_slice(template);

        bytes.push(narrow::<u8>("key count", self.keys.len() as u64)?);
        for key in &self.keys {
            push_short(&mut bytes, "key", key.as_bytes())?;
        }

        bytes.extend_from_slice(&narrow::<u32>("timelock", self.timelock)?.to_be_bytes());
        bytes.push(narrow::<u8>("covenant threshold", self.covenant_threshold)?);

        match &self.slashing {
            Some(terms) => {
                bytes.push(1);
                push_short(&mut bytes, "slashing script", terms.pk_script_hex.as_bytes())?;
                bytes.extend_from_slice(&terms.fee_sat.to_be_bytes());
            }
            None => bytes.push(0),
        }
        Ok(bytes)
    }

    /// Parse [`WalletPolicy::to_bytes`] output
    ///
    /// The action and the covenant key subset are not part of the wire form
    /// and come back empty.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PolicyError> {
        let mut reader = Reader { bytes, pos: 0 };

        if reader.u8()? != POLICY_VERSION {
            return Err(PolicyError::Malformed("unsupported version".to_string()));
        }
        let name = reader.short_string()?;
        let template_len = u16::from_be_bytes([reader.u8()?, reader.u8()?]) as usize;
        let descriptor_template = reader.string(template_len)?;

        let key_count = reader.u8()? as usize;
        let keys = (0..key_count)
            .map(|_| reader.short_string())
            .collect::<Result<Vec<_>, _>>()?;

        let timelock = u32::from_be_bytes(reader.array::<4>()?) as u64;
        let covenant_threshold = reader.u8()? as u64;
        let slashing = match reader.u8()? {
            0 => None,
            _ => Some(SlashingTerms {
                pk_script_hex: reader.short_string()?,
                fee_sat: u64::from_be_bytes(reader.array::<8>()?),
            }),
        };

        Ok(Self {
            action: None,
            name,
            descriptor_template,
            keys,
            covenant_public_keys: Vec::new(),
            covenant_threshold,
            timelock,
            slashing,
        })
    }
}

fn narrow<T: TryFrom<u64>>(field: &str, value: u64) -> Result<T, PolicyError> {
    T::try_from(value)
        .map_err(|_| PolicyError::Malformed(format!("{} {} does not fit the wire form", field, value)))
}

fn push_short(bytes: &mut Vec<u8>, field: &str, data: &[u8]) -> Result<(), PolicyError> {
    bytes.push(narrow::<u8>(field, data.len() as u64)?);
    bytes.extend_from_slice(data);
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, len: usize) -> Result<&[u8], PolicyError> {
        let end = self.pos + len;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| PolicyError::Malformed("unexpected end of policy".to_string()))?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, PolicyError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], PolicyError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn string(&mut self, len: usize) -> Result<String, PolicyError> {
        String::from_utf8(self.take(len)?.to_vec())
            .map_err(|e| PolicyError::Malformed(e.to_string()))
    }

    fn short_string(&mut self) -> Result<String, PolicyError> {
        let len = self.u8()? as usize;
        self.string(len)
    }
}
