//! In-process ledger that runs the counter program, and a wallet that signs
//! against it. Used by the demo command and the test suites.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use sha2::{Digest, Sha512};
use shared::{
    domain::{Address, Identity, Lamports, TransactionSignature, SYSTEM_PROGRAM_ID},
    error::CounterError,
    pda,
    protocol::{AccountPayload, CounterAccount, CounterCommand, Instruction, COUNTER_ACCOUNT_SPACE},
};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::{LedgerClient, Result, WalletSession};

pub const DEFAULT_FEE_LAMPORTS: u64 = 5_000;
const LAMPORTS_PER_BYTE_YEAR: u64 = 3_480;
const EXEMPTION_THRESHOLD_YEARS: u64 = 2;
const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;

pub fn rent_exempt_minimum(data_len: usize) -> u64 {
    (ACCOUNT_STORAGE_OVERHEAD + data_len as u64) * LAMPORTS_PER_BYTE_YEAR * EXEMPTION_THRESHOLD_YEARS
}

/// Wallet identity for a 32-byte ed25519 secret seed.
pub fn identity_from_seed(seed: [u8; 32]) -> Identity {
    Address::new_from_array(SigningKey::from_bytes(&seed).verifying_key().to_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgramError {
    #[error("program {0} is not deployed")]
    UnknownProgram(Address),
    #[error("instruction data does not match any counter instruction")]
    UnknownInstruction,
    #[error("missing account: {0}")]
    MissingAccount(&'static str),
    #[error("missing required signature for {0}")]
    MissingSignature(Address),
    #[error("ConstraintSeeds: counter account does not match seeds [\"counter\", user]")]
    ConstraintSeeds,
    #[error("system program account is missing or invalid")]
    InvalidSystemProgram,
    #[error("account {0} already in use")]
    AccountAlreadyInUse(Address),
    #[error("AccountNotInitialized: the counter account has not been initialized")]
    AccountNotInitialized,
    #[error("Unauthorized: only the authority can modify this counter")]
    Unauthorized,
    #[error("Overflow: counter overflow")]
    Overflow,
    #[error("Underflow: counter cannot go below zero")]
    Underflow,
    #[error("insufficient funds: need {needed} lamports, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },
}

impl From<ProgramError> for CounterError {
    fn from(value: ProgramError) -> Self {
        CounterError::rejected(value.to_string())
    }
}

struct StoredAccount {
    owner: Address,
    lamports: u64,
    data: Vec<u8>,
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Address, StoredAccount>,
    balances: HashMap<Address, u64>,
    transaction_count: u64,
}

pub struct LocalLedger {
    program_id: Address,
    fee_lamports: u64,
    state: Mutex<LedgerState>,
}

impl LocalLedger {
    pub fn new(program_id: Address) -> Arc<Self> {
        Self::with_fee(program_id, DEFAULT_FEE_LAMPORTS)
    }

    pub fn with_fee(program_id: Address, fee_lamports: u64) -> Arc<Self> {
        Arc::new(Self {
            program_id,
            fee_lamports,
            state: Mutex::new(LedgerState::default()),
        })
    }

    pub fn program_id(&self) -> Address {
        self.program_id
    }

    pub async fn airdrop(&self, address: &Address, lamports: u64) {
        let mut state = self.state.lock().await;
        let balance = state.balances.entry(*address).or_default();
        *balance = balance.saturating_add(lamports);
    }

    pub async fn transaction_count(&self) -> u64 {
        self.state.lock().await.transaction_count
    }

    /// Runs one counter instruction signed by `signer`. Nothing changes
    /// unless the whole instruction succeeds.
    pub async fn execute(
        &self,
        signer: &Identity,
        instruction: &Instruction,
    ) -> std::result::Result<TransactionSignature, ProgramError> {
        if instruction.program_id != self.program_id {
            return Err(ProgramError::UnknownProgram(instruction.program_id));
        }
        let command = CounterCommand::from_instruction_data(&instruction.data)
            .ok_or(ProgramError::UnknownInstruction)?;

        let counter_meta = instruction
            .accounts
            .first()
            .ok_or(ProgramError::MissingAccount("counter"))?;
        let user_meta = instruction
            .accounts
            .get(1)
            .ok_or(ProgramError::MissingAccount("user"))?;
        if user_meta.pubkey != *signer || !user_meta.is_signer {
            return Err(ProgramError::MissingSignature(user_meta.pubkey));
        }

        let expected = pda::counter_address(signer, &self.program_id)
            .map_err(|_| ProgramError::ConstraintSeeds)?;
        if counter_meta.pubkey != expected.address || !counter_meta.is_writable {
            return Err(ProgramError::ConstraintSeeds);
        }

        let mut state = self.state.lock().await;
        let available = state.balances.get(signer).copied().unwrap_or(0);
        let mut needed = self.fee_lamports;

        match command {
            CounterCommand::Initialize => {
                let system_program = instruction
                    .accounts
                    .get(2)
                    .ok_or(ProgramError::MissingAccount("system_program"))?;
                if system_program.pubkey != SYSTEM_PROGRAM_ID {
                    return Err(ProgramError::InvalidSystemProgram);
                }
                if state.accounts.contains_key(&expected.address) {
                    return Err(ProgramError::AccountAlreadyInUse(expected.address));
                }

                let rent = rent_exempt_minimum(COUNTER_ACCOUNT_SPACE);
                needed += rent;
                if available < needed {
                    return Err(ProgramError::InsufficientFunds { needed, available });
                }

                let account = CounterAccount {
                    authority: *signer,
                    count: 0,
                };
                state.accounts.insert(
                    expected.address,
                    StoredAccount {
                        owner: self.program_id,
                        lamports: rent,
                        data: account.encode(),
                    },
                );
            }
            CounterCommand::Increment | CounterCommand::Decrement => {
                if available < needed {
                    return Err(ProgramError::InsufficientFunds { needed, available });
                }
                let stored = state
                    .accounts
                    .get_mut(&expected.address)
                    .ok_or(ProgramError::AccountNotInitialized)?;
                let mut account = CounterAccount::decode(&stored.data)
                    .map_err(|_| ProgramError::AccountNotInitialized)?;
                if account.authority != *signer {
                    return Err(ProgramError::Unauthorized);
                }

                account.count = if command == CounterCommand::Increment {
                    account.count.checked_add(1).ok_or(ProgramError::Overflow)?
                } else {
                    account.count.checked_sub(1).ok_or(ProgramError::Underflow)?
                };
                stored.data = account.encode();
            }
        }

        if let Some(balance) = state.balances.get_mut(signer) {
            *balance -= needed;
        }
        state.transaction_count += 1;
        let signature = simulated_signature(state.transaction_count, signer, &instruction.data);
        debug!(
            %command,
            %signer,
            %signature,
            slot = state.transaction_count,
            "local ledger executed counter instruction"
        );
        Ok(signature)
    }
}

fn simulated_signature(sequence: u64, signer: &Identity, data: &[u8]) -> TransactionSignature {
    let digest = Sha512::new()
        .chain_update(sequence.to_le_bytes())
        .chain_update(signer.as_bytes())
        .chain_update(data)
        .finalize();
    let mut bytes = [0u8; 64];
    bytes.copy_from_slice(&digest);
    TransactionSignature::new_from_array(bytes)
}

#[async_trait]
impl LedgerClient for LocalLedger {
    async fn fetch_account(&self, address: &Address) -> Result<AccountPayload> {
        let state = self.state.lock().await;
        state
            .accounts
            .get(address)
            .map(|account| AccountPayload {
                owner: account.owner,
                lamports: account.lamports,
                data: account.data.clone(),
            })
            .ok_or_else(|| CounterError::AccountNotFound(address.to_string()))
    }

    async fn get_balance(&self, address: &Address) -> Result<Lamports> {
        let state = self.state.lock().await;
        Ok(Lamports(state.balances.get(address).copied().unwrap_or(0)))
    }
}

pub struct LocalWallet {
    ledger: Arc<LocalLedger>,
    identity: RwLock<Option<Identity>>,
    decline_signing: AtomicBool,
}

impl LocalWallet {
    pub fn new(ledger: Arc<LocalLedger>) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            identity: RwLock::new(None),
            decline_signing: AtomicBool::new(false),
        })
    }

    pub fn connected_as(ledger: Arc<LocalLedger>, identity: Identity) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            identity: RwLock::new(Some(identity)),
            decline_signing: AtomicBool::new(false),
        })
    }

    pub async fn connect(&self, identity: Identity) {
        *self.identity.write().await = Some(identity);
    }

    pub async fn disconnect(&self) {
        *self.identity.write().await = None;
    }

    /// Makes every following `submit` fail as if the user refused to sign.
    pub fn set_decline_signing(&self, decline: bool) {
        self.decline_signing.store(decline, Ordering::Release);
    }
}

#[async_trait]
impl WalletSession for LocalWallet {
    async fn current_identity(&self) -> Option<Identity> {
        *self.identity.read().await
    }

    async fn submit(&self, instruction: Instruction) -> Result<TransactionSignature> {
        let identity = self
            .current_identity()
            .await
            .ok_or(CounterError::NotConnected)?;
        if self.decline_signing.load(Ordering::Acquire) {
            return Err(CounterError::rejected("user declined to sign the transaction"));
        }
        self.ledger
            .execute(&identity, &instruction)
            .await
            .map_err(CounterError::from)
    }
}

#[cfg(test)]
#[path = "tests/local_tests.rs"]
mod tests;
