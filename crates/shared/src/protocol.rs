use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    domain::{Address, Identity, SYSTEM_PROGRAM_ID},
    error::CounterError,
};

pub const DISCRIMINATOR_LEN: usize = 8;
/// discriminator + authority + count
pub const COUNTER_ACCOUNT_SPACE: usize = DISCRIMINATOR_LEN + 32 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterCommand {
    Initialize,
    Increment,
    Decrement,
}

impl CounterCommand {
    pub const ALL: [CounterCommand; 3] = [Self::Initialize, Self::Increment, Self::Decrement];

    pub fn name(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Increment => "increment",
            Self::Decrement => "decrement",
        }
    }

    pub fn discriminator(self) -> [u8; DISCRIMINATOR_LEN] {
        discriminator("global", self.name())
    }

    pub fn from_instruction_data(data: &[u8]) -> Option<Self> {
        let prefix = data.get(..DISCRIMINATOR_LEN)?;
        Self::ALL
            .into_iter()
            .find(|command| command.discriminator() == prefix)
    }

    pub fn requires_system_program(self) -> bool {
        matches!(self, Self::Initialize)
    }
}

impl fmt::Display for CounterCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CounterCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|command| command.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown counter command '{s}'"))
    }
}

/// First eight bytes of `sha256("<namespace>:<name>")`.
pub fn discriminator(namespace: &str, name: &str) -> [u8; DISCRIMINATOR_LEN] {
    let digest = Sha256::digest(format!("{namespace}:{name}").as_bytes());
    let mut out = [0u8; DISCRIMINATOR_LEN];
    out.copy_from_slice(&digest[..DISCRIMINATOR_LEN]);
    out
}

pub fn counter_account_discriminator() -> [u8; DISCRIMINATOR_LEN] {
    discriminator("account", "Counter")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMeta {
    pub pubkey: Address,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn writable(pubkey: Address, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: true,
        }
    }

    pub fn readonly(pubkey: Address, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub program_id: Address,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

/// Named account references the counter program expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterAccounts {
    pub counter: Address,
    pub user: Identity,
    pub system_program: Option<Address>,
}

impl CounterAccounts {
    pub fn for_command(command: CounterCommand, counter: Address, user: Identity) -> Self {
        Self {
            counter,
            user,
            system_program: command
                .requires_system_program()
                .then_some(SYSTEM_PROGRAM_ID),
        }
    }

    pub fn to_account_metas(&self) -> Vec<AccountMeta> {
        match self.system_program {
            // The payer of a new account must be writable.
            Some(system_program) => vec![
                AccountMeta::writable(self.counter, false),
                AccountMeta::writable(self.user, true),
                AccountMeta::readonly(system_program, false),
            ],
            None => vec![
                AccountMeta::writable(self.counter, false),
                AccountMeta::readonly(self.user, true),
            ],
        }
    }
}

pub fn counter_instruction(
    program_id: &Address,
    command: CounterCommand,
    counter: Address,
    user: Identity,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: CounterAccounts::for_command(command, counter, user).to_account_metas(),
        data: command.discriminator().to_vec(),
    }
}

/// Raw account as returned by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountPayload {
    pub owner: Address,
    pub lamports: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterAccount {
    pub authority: Address,
    pub count: u64,
}

impl CounterAccount {
    pub fn decode(data: &[u8]) -> Result<Self, CounterError> {
        if data.len() < COUNTER_ACCOUNT_SPACE {
            return Err(CounterError::Decode(format!(
                "expected at least {COUNTER_ACCOUNT_SPACE} bytes, got {}",
                data.len()
            )));
        }
        if data[..DISCRIMINATOR_LEN] != counter_account_discriminator() {
            return Err(CounterError::Decode(
                "account discriminator does not match Counter".to_string(),
            ));
        }

        let authority = Address::try_from_slice(&data[DISCRIMINATOR_LEN..DISCRIMINATOR_LEN + 32])?;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&data[DISCRIMINATOR_LEN + 32..COUNTER_ACCOUNT_SPACE]);

        Ok(Self {
            authority,
            count: u64::from_le_bytes(count_bytes),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(COUNTER_ACCOUNT_SPACE);
        data.extend_from_slice(&counter_account_discriminator());
        data.extend_from_slice(self.authority.as_bytes());
        data.extend_from_slice(&self.count.to_le_bytes());
        data
    }
}

// JSON-RPC 2.0 wire types.

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a, P> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: P,
}

impl<'a, P> RpcRequest<'a, P> {
    pub fn new(id: u64, method: &'a str, params: P) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse<T> {
    #[serde(default)]
    pub id: Option<u64>,
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

impl From<RpcErrorObject> for CounterError {
    fn from(value: RpcErrorObject) -> Self {
        Self::Rpc {
            code: value.code,
            message: value.message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcContext {
    pub slot: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcContextValue<T> {
    pub context: RpcContext,
    pub value: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcAccount {
    pub lamports: u64,
    pub owner: String,
    /// `[payload, encoding]`
    pub data: (String, String),
    #[serde(default)]
    pub executable: bool,
    #[serde(default)]
    pub rent_epoch: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountInfoConfig {
    pub encoding: &'static str,
    pub commitment: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitmentConfig {
    pub commitment: &'static str,
}
