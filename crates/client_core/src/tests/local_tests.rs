use super::*;
use shared::{
    domain::LAMPORTS_PER_SOL,
    protocol::{counter_instruction, AccountMeta},
};

fn program_id() -> Address {
    Address::new_from_array([3u8; 32])
}

fn counter_of(identity: &Identity) -> Address {
    pda::counter_address(identity, &program_id())
        .expect("derive")
        .address
}

async fn funded_ledger(users: &[Identity]) -> Arc<LocalLedger> {
    let ledger = LocalLedger::new(program_id());
    for user in users {
        ledger.airdrop(user, LAMPORTS_PER_SOL).await;
    }
    ledger
}

fn ix(command: CounterCommand, user: Identity) -> Instruction {
    counter_instruction(&program_id(), command, counter_of(&user), user)
}

#[test]
fn rent_for_counter_account_matches_ledger_schedule() {
    assert_eq!(rent_exempt_minimum(COUNTER_ACCOUNT_SPACE), 1_224_960);
    assert_eq!(rent_exempt_minimum(0), 890_880);
}

#[test]
fn seeded_identities_are_stable_and_distinct() {
    assert_eq!(identity_from_seed([1; 32]), identity_from_seed([1; 32]));
    assert_ne!(identity_from_seed([1; 32]), identity_from_seed([2; 32]));
}

#[tokio::test]
async fn initialize_creates_program_owned_account() {
    let user = identity_from_seed([1; 32]);
    let ledger = funded_ledger(&[user]).await;

    ledger
        .execute(&user, &ix(CounterCommand::Initialize, user))
        .await
        .expect("initialize");

    let payload = ledger
        .fetch_account(&counter_of(&user))
        .await
        .expect("account");
    assert_eq!(payload.owner, program_id());
    assert_eq!(payload.lamports, rent_exempt_minimum(COUNTER_ACCOUNT_SPACE));
    let account = CounterAccount::decode(&payload.data).expect("decode");
    assert_eq!(account.authority, user);
    assert_eq!(account.count, 0);
}

#[tokio::test]
async fn second_initialize_fails_with_account_in_use() {
    let user = identity_from_seed([2; 32]);
    let ledger = funded_ledger(&[user]).await;
    ledger
        .execute(&user, &ix(CounterCommand::Initialize, user))
        .await
        .expect("initialize");

    let err = ledger
        .execute(&user, &ix(CounterCommand::Initialize, user))
        .await
        .expect_err("duplicate");
    assert_eq!(err, ProgramError::AccountAlreadyInUse(counter_of(&user)));
}

#[tokio::test]
async fn increment_before_initialize_is_rejected() {
    let user = identity_from_seed([3; 32]);
    let ledger = funded_ledger(&[user]).await;

    let err = ledger
        .execute(&user, &ix(CounterCommand::Increment, user))
        .await
        .expect_err("uninitialized");
    assert_eq!(err, ProgramError::AccountNotInitialized);
    assert_eq!(ledger.transaction_count().await, 0);
}

#[tokio::test]
async fn foreign_counter_address_violates_seeds() {
    let alice = identity_from_seed([4; 32]);
    let bob = identity_from_seed([5; 32]);
    let ledger = funded_ledger(&[alice, bob]).await;
    ledger
        .execute(&alice, &ix(CounterCommand::Initialize, alice))
        .await
        .expect("initialize");

    let tampered = counter_instruction(
        &program_id(),
        CounterCommand::Increment,
        counter_of(&alice),
        bob,
    );
    let err = ledger.execute(&bob, &tampered).await.expect_err("seeds");
    assert_eq!(err, ProgramError::ConstraintSeeds);
}

#[tokio::test]
async fn user_account_must_be_the_signer() {
    let alice = identity_from_seed([6; 32]);
    let bob = identity_from_seed([7; 32]);
    let ledger = funded_ledger(&[alice, bob]).await;

    let err = ledger
        .execute(&bob, &ix(CounterCommand::Initialize, alice))
        .await
        .expect_err("wrong signer");
    assert_eq!(err, ProgramError::MissingSignature(alice));
}

#[tokio::test]
async fn initialize_requires_system_program() {
    let user = identity_from_seed([8; 32]);
    let ledger = funded_ledger(&[user]).await;

    let mut instruction = ix(CounterCommand::Initialize, user);
    instruction.accounts[2] = AccountMeta::readonly(Address::new_from_array([1; 32]), false);
    let err = ledger.execute(&user, &instruction).await.expect_err("bad system program");
    assert_eq!(err, ProgramError::InvalidSystemProgram);

    instruction.accounts.truncate(2);
    let err = ledger.execute(&user, &instruction).await.expect_err("missing");
    assert_eq!(err, ProgramError::MissingAccount("system_program"));
}

#[tokio::test]
async fn unfunded_signer_cannot_pay_rent() {
    let user = identity_from_seed([9; 32]);
    let ledger = LocalLedger::new(program_id());
    ledger.airdrop(&user, DEFAULT_FEE_LAMPORTS).await;

    let err = ledger
        .execute(&user, &ix(CounterCommand::Initialize, user))
        .await
        .expect_err("rent");
    assert!(matches!(err, ProgramError::InsufficientFunds { .. }));
    assert!(ledger
        .fetch_account(&counter_of(&user))
        .await
        .expect_err("no account")
        .is_not_found());
}

#[tokio::test]
async fn rejects_other_programs_and_unknown_instructions() {
    let user = identity_from_seed([10; 32]);
    let ledger = funded_ledger(&[user]).await;

    let mut instruction = ix(CounterCommand::Initialize, user);
    instruction.program_id = Address::new_from_array([4u8; 32]);
    let err = ledger.execute(&user, &instruction).await.expect_err("program");
    assert!(matches!(err, ProgramError::UnknownProgram(_)));

    let mut instruction = ix(CounterCommand::Initialize, user);
    instruction.data = vec![0u8; 8];
    let err = ledger.execute(&user, &instruction).await.expect_err("data");
    assert_eq!(err, ProgramError::UnknownInstruction);
}

#[tokio::test]
async fn signatures_are_unique_per_transaction() {
    let user = identity_from_seed([11; 32]);
    let ledger = funded_ledger(&[user]).await;
    ledger
        .execute(&user, &ix(CounterCommand::Initialize, user))
        .await
        .expect("initialize");

    let first = ledger
        .execute(&user, &ix(CounterCommand::Increment, user))
        .await
        .expect("first");
    let second = ledger
        .execute(&user, &ix(CounterCommand::Increment, user))
        .await
        .expect("second");
    assert_ne!(first, second);
}

#[tokio::test]
async fn wallet_requires_connection_and_honours_decline() {
    let user = identity_from_seed([12; 32]);
    let ledger = funded_ledger(&[user]).await;
    let wallet = LocalWallet::new(ledger.clone());

    let err = wallet
        .submit(ix(CounterCommand::Initialize, user))
        .await
        .expect_err("disconnected");
    assert_eq!(err, CounterError::NotConnected);

    wallet.connect(user).await;
    assert!(wallet.connected().await);
    wallet.set_decline_signing(true);
    let err = wallet
        .submit(ix(CounterCommand::Initialize, user))
        .await
        .expect_err("declined");
    assert!(matches!(err, CounterError::SubmissionRejected { .. }));

    wallet.set_decline_signing(false);
    wallet
        .submit(ix(CounterCommand::Initialize, user))
        .await
        .expect("signed");
}
