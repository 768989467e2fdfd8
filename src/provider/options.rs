//! PSBT signing options and staking contract descriptors

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::provider::ledger::PolicyError;

/// Largest block count a BIP-68 relative timelock can encode
pub const MAX_RELATIVE_TIMELOCK_BLOCKS: u64 = 0xFFFF;

/// Options accompanying a PSBT signing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignPsbtOptions {
    /// Finalize signed inputs before returning
    #[serde(default = "default_true")]
    pub auto_finalized: bool,

    /// Restrict signing to these inputs (all inputs when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_sign_inputs: Option<Vec<ToSignInput>>,

    /// Staking contracts describing the scripts being spent or created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contracts: Option<Vec<SigningContract>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<SigningAction>,
}

fn default_true() -> bool {
    true
}

impl Default for SignPsbtOptions {
    fn default() -> Self {
        Self {
            auto_finalized: true,
            to_sign_inputs: None,
            contracts: None,
            action: None,
        }
    }
}

impl SignPsbtOptions {
    /// Options for a staking-protocol transaction
    pub fn for_action(action: SigningAction, contracts: Vec<SigningContract>) -> Self {
        Self {
            contracts: Some(contracts),
            action: Some(action),
            ..Self::default()
        }
    }
}

/// One input to sign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToSignInput {
    pub index: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_hex: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Sign with the untweaked key (taproot script path)
    #[serde(default)]
    pub disable_tweak_signer: bool,
}

impl ToSignInput {
    pub fn key_path(index: usize) -> Self {
        Self {
            index,
            public_key_hex: None,
            address: None,
            disable_tweak_signer: false,
        }
    }

    pub fn script_path(index: usize) -> Self {
        Self {
            disable_tweak_signer: true,
            ..Self::key_path(index)
        }
    }
}

/// Staking transaction kind being signed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SigningAction {
    Staking,
    Unbonding,
    Slashing,
    UnbondingSlashing,
    Withdraw,
}

impl SigningAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SigningAction::Staking => "staking",
            SigningAction::Unbonding => "unbonding",
            SigningAction::Slashing => "slashing",
            SigningAction::UnbondingSlashing => "unbonding-slashing",
            SigningAction::Withdraw => "withdraw",
        }
    }
}

impl std::fmt::Display for SigningAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Staking contract identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractId {
    Staking,
    Unbonding,
    Slashing,
    SlashingBurn,
    Withdraw,
}

impl ContractId {
    pub fn as_str(self) -> &'static str {
        match self {
            ContractId::Staking => "STAKING",
            ContractId::Unbonding => "UNBONDING",
            ContractId::Slashing => "SLASHING",
            ContractId::SlashingBurn => "SLASHING_BURN",
            ContractId::Withdraw => "WITHDRAW",
        }
    }
}

impl std::fmt::Display for ContractId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A staking contract: id plus opaque parameters
///
/// Parameters are read through the typed accessors below; unknown keys are
/// ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningContract {
    pub id: ContractId,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl SigningContract {
    pub fn new(id: ContractId, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self { id, params }
    }

    pub fn str_param(&self, name: &str) -> Result<&str, PolicyError> {
        self.params
            .get(name)
            .ok_or_else(|| self.invalid(name, "missing"))?
            .as_str()
            .ok_or_else(|| self.invalid(name, "expected a string"))
    }

    pub fn u64_param(&self, name: &str) -> Result<u64, PolicyError> {
        self.params
            .get(name)
            .ok_or_else(|| self.invalid(name, "missing"))?
            .as_u64()
            .ok_or_else(|| self.invalid(name, "expected an unsigned integer"))
    }

    pub fn str_list_param(&self, name: &str) -> Result<Vec<String>, PolicyError> {
        let values = self
            .params
            .get(name)
            .ok_or_else(|| self.invalid(name, "missing"))?
            .as_array()
            .ok_or_else(|| self.invalid(name, "expected an array"))?;

        values
            .iter()
            .map(|value| {
                value
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.invalid(name, "expected an array of strings"))
            })
            .collect()
    }

    pub fn staker_public_key(&self) -> Result<&str, PolicyError> {
        self.str_param("stakerPk")
    }

    pub fn finality_provider_keys(&self) -> Result<Vec<String>, PolicyError> {
        self.str_list_param("finalityProviders")
    }

    pub fn covenant_keys(&self) -> Result<Vec<String>, PolicyError> {
        self.str_list_param("covenantPks")
    }

    pub fn covenant_threshold(&self) -> Result<u64, PolicyError> {
        self.u64_param("covenantThreshold")
    }

    /// Block-based relative timelock usable in `older(n)`
    pub fn timelock_param(&self, name: &str) -> Result<u64, PolicyError> {
        let blocks = self.u64_param(name)?;
        if !(1..=MAX_RELATIVE_TIMELOCK_BLOCKS).contains(&blocks) {
            return Err(self.invalid(
                name,
                &format!(
                    "{} blocks outside 1..={}",
                    blocks, MAX_RELATIVE_TIMELOCK_BLOCKS
                ),
            ));
        }
        Ok(blocks)
    }

    pub fn staking_duration(&self) -> Result<u64, PolicyError> {
        self.timelock_param("stakingDuration")
    }

    pub fn unbonding_time_blocks(&self) -> Result<u64, PolicyError> {
        self.timelock_param("unbondingTimeBlocks")
    }

    pub fn timelock_blocks(&self) -> Result<u64, PolicyError> {
        self.timelock_param("timelockBlocks")
    }

    pub fn slashing_pk_script_hex(&self) -> Result<&str, PolicyError> {
        self.str_param("slashingPkScriptHex")
    }

    pub fn slashing_fee_sat(&self) -> Result<u64, PolicyError> {
        self.u64_param("slashingFeeSat")
    }

    fn invalid(&self, param: &str, reason: &str) -> PolicyError {
        PolicyError::InvalidParam {
            contract: self.id,
            param: param.to_string(),
            reason: reason.to_string(),
        }
    }
}
