use super::*;
use crate::{CounterClient, Guarded, ReadOnlyWallet};
use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Value};
use shared::{
    domain::{CounterState, Identity},
    pda,
    protocol::CounterAccount,
};
use std::{collections::HashMap, sync::Arc};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone)]
enum MockAccount {
    Account { owner: Address, data: Vec<u8> },
    RpcError { code: i64, message: String },
    BadEncoding,
}

#[derive(Clone, Default)]
struct MockRpc {
    accounts: Arc<Mutex<HashMap<String, MockAccount>>>,
    balances: Arc<Mutex<HashMap<String, u64>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

fn program_id() -> Address {
    Address::new_from_array([5u8; 32])
}

fn user(seed: u8) -> Identity {
    crate::identity_from_seed([seed; 32])
}

async fn handle_rpc(State(state): State<MockRpc>, Json(request): Json<Value>) -> Json<Value> {
    state.requests.lock().await.push(request.clone());
    let id = request["id"].clone();
    let address = request["params"][0].as_str().unwrap_or_default().to_string();

    let body = match request["method"].as_str() {
        Some("getAccountInfo") => match state.accounts.lock().await.get(&address).cloned() {
            None => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "context": { "slot": 7 }, "value": null }
            }),
            Some(MockAccount::Account { owner, data }) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "context": { "slot": 7 },
                    "value": {
                        "lamports": 1_224_960u64,
                        "owner": owner.to_string(),
                        "data": [STANDARD.encode(data), "base64"],
                        "executable": false,
                        "rentEpoch": u64::MAX
                    }
                }
            }),
            Some(MockAccount::BadEncoding) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "context": { "slot": 7 },
                    "value": {
                        "lamports": 1,
                        "owner": program_id().to_string(),
                        "data": ["not base64!", "base64"]
                    }
                }
            }),
            Some(MockAccount::RpcError { code, message }) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": code, "message": message }
            }),
        },
        Some("getBalance") => {
            let lamports = state
                .balances
                .lock()
                .await
                .get(&address)
                .copied()
                .unwrap_or(0);
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "context": { "slot": 7 }, "value": lamports }
            })
        }
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": "Method not found" }
        }),
    };
    Json(body)
}

async fn spawn_rpc_server(state: MockRpc) -> anyhow::Result<String> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new()
        .route("/", post(handle_rpc))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

async fn insert_counter(state: &MockRpc, identity: &Identity, count: u64) -> Address {
    let address = pda::counter_address(identity, &program_id())
        .expect("derive")
        .address;
    state.accounts.lock().await.insert(
        address.to_string(),
        MockAccount::Account {
            owner: program_id(),
            data: CounterAccount {
                authority: *identity,
                count,
            }
            .encode(),
        },
    );
    address
}

#[tokio::test]
async fn fetches_and_decodes_existing_account() {
    let state = MockRpc::default();
    let identity = user(1);
    let address = insert_counter(&state, &identity, 9).await;
    let url = spawn_rpc_server(state.clone()).await.expect("spawn server");

    let ledger = JsonRpcLedger::new(url, Commitment::Processed);
    let payload = ledger.fetch_account(&address).await.expect("fetch");

    assert_eq!(payload.owner, program_id());
    assert_eq!(CounterAccount::decode(&payload.data).expect("decode").count, 9);

    let requests = state.requests.lock().await;
    assert_eq!(requests[0]["jsonrpc"], "2.0");
    assert_eq!(requests[0]["method"], "getAccountInfo");
    assert_eq!(requests[0]["params"][0], address.to_string());
    assert_eq!(requests[0]["params"][1]["encoding"], "base64");
    assert_eq!(requests[0]["params"][1]["commitment"], "processed");
}

#[tokio::test]
async fn null_account_value_means_not_found() {
    let url = spawn_rpc_server(MockRpc::default()).await.expect("spawn server");
    let ledger = JsonRpcLedger::new(url, Commitment::Confirmed);

    let err = ledger
        .fetch_account(&Address::new_from_array([8u8; 32]))
        .await
        .expect_err("missing");
    assert!(err.is_not_found());
}

#[tokio::test]
async fn rpc_error_objects_are_distinguished_from_not_found() {
    let state = MockRpc::default();
    let address = Address::new_from_array([9u8; 32]);
    state.accounts.lock().await.insert(
        address.to_string(),
        MockAccount::RpcError {
            code: -32005,
            message: "Node is behind".into(),
        },
    );
    let url = spawn_rpc_server(state).await.expect("spawn server");
    let ledger = JsonRpcLedger::new(url, Commitment::Confirmed);

    let err = ledger.fetch_account(&address).await.expect_err("rpc error");
    assert_eq!(
        err,
        CounterError::Rpc {
            code: -32005,
            message: "Node is behind".into()
        }
    );
}

#[tokio::test]
async fn malformed_account_data_is_a_decode_error() {
    let state = MockRpc::default();
    let address = Address::new_from_array([10u8; 32]);
    state
        .accounts
        .lock()
        .await
        .insert(address.to_string(), MockAccount::BadEncoding);
    let url = spawn_rpc_server(state).await.expect("spawn server");
    let ledger = JsonRpcLedger::new(url, Commitment::Confirmed);

    let err = ledger.fetch_account(&address).await.expect_err("bad data");
    assert!(matches!(err, CounterError::Decode(_)));
}

#[tokio::test]
async fn reads_balance() {
    let state = MockRpc::default();
    let identity = user(2);
    state
        .balances
        .lock()
        .await
        .insert(identity.to_string(), 2_500_000_000);
    let url = spawn_rpc_server(state.clone()).await.expect("spawn server");
    let ledger = JsonRpcLedger::new(url, Commitment::Finalized);

    let balance = ledger.get_balance(&identity).await.expect("balance");
    assert_eq!(balance, Lamports(2_500_000_000));
    assert_eq!(balance.to_string(), "2.5000 SOL");

    let requests = state.requests.lock().await;
    assert_eq!(requests[0]["method"], "getBalance");
    assert_eq!(requests[0]["params"][1]["commitment"], "finalized");
}

#[tokio::test]
async fn unreachable_endpoint_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let ledger = JsonRpcLedger::new(format!("http://{addr}"), Commitment::Confirmed)
        .with_timeout(Duration::from_secs(2));
    let err = ledger
        .fetch_account(&Address::new_from_array([1u8; 32]))
        .await
        .expect_err("unreachable");
    assert!(matches!(err, CounterError::Network(_)));
}

#[tokio::test]
async fn counter_client_reads_through_json_rpc() {
    let state = MockRpc::default();
    let initialized = user(3);
    insert_counter(&state, &initialized, 4).await;
    let url = spawn_rpc_server(state).await.expect("spawn server");

    let ledger: Arc<JsonRpcLedger> = Arc::new(JsonRpcLedger::new(url, Commitment::Confirmed));
    let client = CounterClient::new(
        program_id(),
        ledger.clone(),
        Arc::new(ReadOnlyWallet::new(Some(initialized))),
    );
    client.sync_session().await.expect("sync");
    assert_eq!(client.counter_state().await, Some(CounterState::Value(4)));

    let fresh = CounterClient::new(
        program_id(),
        ledger,
        Arc::new(ReadOnlyWallet::new(Some(user(4)))),
    );
    fresh.sync_session().await.expect("sync");
    assert_eq!(
        fresh.refresh().await.expect("refresh"),
        Guarded::Completed(CounterState::Absent)
    );
}
