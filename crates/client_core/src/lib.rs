use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{Address, CounterState, Identity, Lamports, TransactionRecord, TransactionSignature},
    error::CounterError,
    pda::{self, DerivedAddress},
    protocol::{self, AccountPayload, CounterAccount, CounterCommand, Instruction},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

pub mod local;
pub mod rpc;

pub use local::{identity_from_seed, LocalLedger, LocalWallet};
pub use rpc::JsonRpcLedger;

pub type Result<T, E = CounterError> = std::result::Result<T, E>;

/// The wallet side of a session: who is connected and who signs.
#[async_trait]
pub trait WalletSession: Send + Sync {
    async fn current_identity(&self) -> Option<Identity>;

    async fn connected(&self) -> bool {
        self.current_identity().await.is_some()
    }

    async fn submit(&self, instruction: Instruction) -> Result<TransactionSignature>;
}

/// Read access to the ledger. A missing account is reported as
/// [`CounterError::AccountNotFound`], never as a transport failure.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn fetch_account(&self, address: &Address) -> Result<AccountPayload>;
    async fn get_balance(&self, address: &Address) -> Result<Lamports>;
}

/// A wallet that knows an identity but cannot sign.
pub struct ReadOnlyWallet {
    identity: Option<Identity>,
}

impl ReadOnlyWallet {
    pub fn new(identity: Option<Identity>) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl WalletSession for ReadOnlyWallet {
    async fn current_identity(&self) -> Option<Identity> {
        self.identity
    }

    async fn submit(&self, _instruction: Instruction) -> Result<TransactionSignature> {
        Err(CounterError::rejected("read-only wallet cannot sign transactions"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundSession {
    pub identity: Identity,
    pub counter: DerivedAddress,
}

impl BoundSession {
    pub fn bind(identity: Identity, program_id: &Address) -> Result<Self> {
        let counter = pda::counter_address(&identity, program_id)?;
        Ok(Self { identity, counter })
    }

    pub fn counter_address(&self) -> Address {
        self.counter.address
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// `counter` is `None` until the first fetch of this session succeeds.
    Connected {
        session: BoundSession,
        counter: Option<CounterState>,
    },
}

impl SessionState {
    pub fn counter(&self) -> Option<CounterState> {
        match self {
            Self::Disconnected => None,
            Self::Connected { counter, .. } => *counter,
        }
    }
}

/// Result of an operation subject to the single-outstanding-operation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded<T> {
    Completed(T),
    OperationPending,
}

impl<T> Guarded<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::OperationPending => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::OperationPending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReport {
    pub transaction: TransactionRecord,
    pub counter: Option<CounterState>,
    /// Set when the follow-up fetch failed; `counter` is then the last known value.
    pub refresh_error: Option<CounterError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub state: SessionState,
    pub last_transaction: Option<TransactionRecord>,
    pub busy: bool,
}

impl ClientSnapshot {
    pub fn can_dispatch(&self, command: CounterCommand) -> bool {
        !self.busy
            && matches!(self.state, SessionState::Connected { .. })
            && check_command_allowed(command, self.state.counter()).is_ok()
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    SessionChanged(SessionState),
    CounterUpdated {
        address: Address,
        state: CounterState,
    },
    TransactionSubmitted(TransactionRecord),
    Error(String),
}

pub fn check_command_allowed(command: CounterCommand, counter: Option<CounterState>) -> Result<()> {
    let allowed = matches!(
        (command, counter),
        (CounterCommand::Initialize, Some(CounterState::Absent))
            | (
                CounterCommand::Increment | CounterCommand::Decrement,
                Some(CounterState::Value(_))
            )
    );
    if allowed {
        return Ok(());
    }

    Err(CounterError::CommandNotAllowed {
        command,
        state: describe_counter(counter),
    })
}

fn describe_counter(counter: Option<CounterState>) -> String {
    match counter {
        None => "not yet synced".to_string(),
        Some(CounterState::Absent) => "not initialized".to_string(),
        Some(CounterState::Value(count)) => format!("initialized at {count}"),
    }
}

struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct CounterClientState {
    session: Option<BoundSession>,
    counter: Option<CounterState>,
    last_transaction: Option<TransactionRecord>,
}

/// Keeps the displayed counter in step with the remote account.
///
/// The state only changes through [`CounterClient::sync_session`],
/// [`CounterClient::refresh`] and [`CounterClient::dispatch`]. Refresh and
/// dispatch share one in-flight slot; a call made while the slot is taken
/// returns [`Guarded::OperationPending`] and has no effect.
pub struct CounterClient {
    program_id: Address,
    ledger: Arc<dyn LedgerClient>,
    wallet: Arc<dyn WalletSession>,
    inner: Mutex<CounterClientState>,
    in_flight: AtomicBool,
    events: broadcast::Sender<ClientEvent>,
}

impl CounterClient {
    pub fn new(
        program_id: Address,
        ledger: Arc<dyn LedgerClient>,
        wallet: Arc<dyn WalletSession>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            program_id,
            ledger,
            wallet,
            inner: Mutex::new(CounterClientState::default()),
            in_flight: AtomicBool::new(false),
            events,
        })
    }

    pub fn program_id(&self) -> Address {
        self.program_id
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn snapshot(&self) -> ClientSnapshot {
        let inner = self.inner.lock().await;
        ClientSnapshot {
            state: state_of(&inner),
            last_transaction: inner.last_transaction.clone(),
            busy: self.is_busy(),
        }
    }

    pub async fn session(&self) -> Option<BoundSession> {
        self.inner.lock().await.session
    }

    pub async fn counter_state(&self) -> Option<CounterState> {
        self.inner.lock().await.counter
    }

    pub async fn last_transaction(&self) -> Option<TransactionRecord> {
        self.inner.lock().await.last_transaction.clone()
    }

    /// Rebinds to the wallet's current identity.
    ///
    /// An unchanged identity is a no-op. A new identity derives a fresh
    /// counter address and fetches it; if that fetch fails the session stays
    /// bound with an unsynced counter and the error is returned. A missing
    /// identity drops the session.
    pub async fn sync_session(&self) -> Result<Guarded<SessionState>> {
        let identity = self.wallet.current_identity().await;
        let bound = self.inner.lock().await.session;

        let identity = match (identity, bound) {
            (None, None) => return Ok(Guarded::Completed(SessionState::Disconnected)),
            (None, Some(_)) => {
                self.disconnect_session().await;
                return Ok(Guarded::Completed(SessionState::Disconnected));
            }
            (Some(identity), Some(session)) if session.identity == identity => {
                let inner = self.inner.lock().await;
                return Ok(Guarded::Completed(state_of(&inner)));
            }
            (Some(identity), _) => identity,
        };

        let Some(_guard) = self.try_begin() else {
            debug!(%identity, "deferring session rebind while another operation is outstanding");
            return Ok(Guarded::OperationPending);
        };

        let session = self.bind_identity(identity).await?;
        self.fetch_and_apply(&session).await?;
        let inner = self.inner.lock().await;
        Ok(Guarded::Completed(state_of(&inner)))
    }

    /// Re-reads the counter for the wallet's current identity, rebinding
    /// first if the wallet switched accounts since the last bind.
    pub async fn refresh(&self) -> Result<Guarded<CounterState>> {
        let Some(_guard) = self.try_begin() else {
            debug!("ignoring refresh while another operation is outstanding");
            return Ok(Guarded::OperationPending);
        };
        let (session, _) = self.current_session().await?;
        self.fetch_and_apply(&session).await.map(Guarded::Completed)
    }

    pub async fn dispatch(&self, command: CounterCommand) -> Result<Guarded<SubmissionReport>> {
        let Some(_guard) = self.try_begin() else {
            debug!(%command, "ignoring command while another operation is outstanding");
            return Ok(Guarded::OperationPending);
        };

        let (session, rebound) = self.current_session().await?;
        // A fresh binding has no synced counter yet.
        let counter = if rebound {
            Some(self.fetch_and_apply(&session).await?)
        } else {
            self.inner.lock().await.counter
        };
        check_command_allowed(command, counter)?;

        let instruction = protocol::counter_instruction(
            &self.program_id,
            command,
            session.counter_address(),
            session.identity,
        );
        info!(
            %command,
            identity = %session.identity,
            counter = %session.counter_address(),
            "submitting counter instruction"
        );

        let signature = match self.wallet.submit(instruction).await {
            Ok(signature) => signature,
            Err(err) => {
                error!(%command, kind = ?err.kind(), error = %err, "counter instruction failed");
                self.emit(ClientEvent::Error(err.to_string()));
                return Err(err);
            }
        };

        let record = TransactionRecord {
            command,
            signature,
            submitted_at: Utc::now(),
        };
        info!(%command, %signature, "counter instruction accepted");
        self.inner.lock().await.last_transaction = Some(record.clone());
        self.emit(ClientEvent::TransactionSubmitted(record.clone()));

        let (counter, refresh_error) = match self.fetch_and_apply(&session).await {
            Ok(state) => (Some(state), None),
            Err(err) => (self.inner.lock().await.counter, Some(err)),
        };

        Ok(Guarded::Completed(SubmissionReport {
            transaction: record,
            counter,
            refresh_error,
        }))
    }

    pub async fn initialize(&self) -> Result<Guarded<SubmissionReport>> {
        self.dispatch(CounterCommand::Initialize).await
    }

    pub async fn increment(&self) -> Result<Guarded<SubmissionReport>> {
        self.dispatch(CounterCommand::Increment).await
    }

    pub async fn decrement(&self) -> Result<Guarded<SubmissionReport>> {
        self.dispatch(CounterCommand::Decrement).await
    }

    /// Balance of the wallet's current identity.
    pub async fn balance(&self) -> Result<Lamports> {
        let identity = self
            .wallet
            .current_identity()
            .await
            .ok_or(CounterError::NotConnected)?;
        self.ledger.get_balance(&identity).await
    }

    fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard {
                flag: &self.in_flight,
            })
    }

    /// Session for the identity the wallet holds right now. The flag is set
    /// when the binding had to be replaced. Caller holds the in-flight slot.
    async fn current_session(&self) -> Result<(BoundSession, bool)> {
        let Some(identity) = self.wallet.current_identity().await else {
            self.disconnect_session().await;
            return Err(CounterError::NotConnected);
        };

        let bound = self.inner.lock().await.session;
        match bound {
            Some(session) if session.identity == identity => Ok((session, false)),
            stale => {
                if let Some(stale) = stale {
                    info!(
                        previous = %stale.identity,
                        %identity,
                        "wallet identity changed; rebinding counter session"
                    );
                }
                self.bind_identity(identity).await.map(|session| (session, true))
            }
        }
    }

    /// Derives the counter address for `identity` and installs it as the
    /// session with an unsynced counter. Caller holds the in-flight slot.
    async fn bind_identity(&self, identity: Identity) -> Result<BoundSession> {
        let session = match BoundSession::bind(identity, &self.program_id) {
            Ok(session) => session,
            Err(err) => {
                error!(%identity, error = %err, "failed to derive counter address");
                self.disconnect_session().await;
                self.emit(ClientEvent::Error(err.to_string()));
                return Err(err);
            }
        };

        let state = {
            let mut inner = self.inner.lock().await;
            inner.session = Some(session);
            inner.counter = None;
            state_of(&inner)
        };
        info!(
            %identity,
            counter = %session.counter_address(),
            bump = session.counter.bump,
            "bound counter session"
        );
        self.emit(ClientEvent::SessionChanged(state));
        Ok(session)
    }

    async fn disconnect_session(&self) {
        let mut inner = self.inner.lock().await;
        if inner.session.take().is_some() {
            inner.counter = None;
            drop(inner);
            info!("wallet disconnected; counter session cleared");
            self.emit(ClientEvent::SessionChanged(SessionState::Disconnected));
        }
    }

    async fn fetch_counter(&self, address: &Address) -> Result<CounterState> {
        match self.ledger.fetch_account(address).await {
            Ok(payload) => self.decode_counter(payload),
            Err(err) if err.is_not_found() => Ok(CounterState::Absent),
            Err(err) => Err(err),
        }
    }

    fn decode_counter(&self, payload: AccountPayload) -> Result<CounterState> {
        if payload.owner != self.program_id {
            return Err(CounterError::Decode(format!(
                "account is owned by {}, expected {}",
                payload.owner, self.program_id
            )));
        }
        let account = CounterAccount::decode(&payload.data)?;
        Ok(CounterState::Value(account.count))
    }

    async fn fetch_and_apply(&self, session: &BoundSession) -> Result<CounterState> {
        let address = session.counter_address();
        let fetched = self.fetch_counter(&address).await;

        let state = match fetched {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    counter = %address,
                    kind = ?err.kind(),
                    error = %err,
                    "counter fetch failed; keeping last known state"
                );
                self.emit(ClientEvent::Error(err.to_string()));
                return Err(err);
            }
        };

        if state == CounterState::Absent {
            debug!(counter = %address, "counter account not initialized");
        }

        let mut inner = self.inner.lock().await;
        // The wallet may have switched identities while the fetch was in flight.
        if inner.session.map(|bound| bound.counter_address()) != Some(address) {
            debug!(counter = %address, "discarding fetch result for a stale session");
            return Ok(state);
        }
        inner.counter = Some(state);
        drop(inner);

        self.emit(ClientEvent::CounterUpdated { address, state });
        Ok(state)
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

fn state_of(inner: &CounterClientState) -> SessionState {
    match inner.session {
        None => SessionState::Disconnected,
        Some(session) => SessionState::Connected {
            session,
            counter: inner.counter,
        },
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
