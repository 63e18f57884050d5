use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{Address, Commitment, Lamports},
    error::CounterError,
    protocol::{
        AccountInfoConfig, AccountPayload, CommitmentConfig, RpcAccount, RpcContextValue,
        RpcRequest, RpcResponse,
    },
};
use tracing::debug;

use crate::{LedgerClient, Result};

pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Ledger reads over the JSON-RPC 2.0 HTTP interface.
pub struct JsonRpcLedger {
    http: Client,
    url: String,
    commitment: Commitment,
    timeout: Duration,
    next_id: AtomicU64,
}

impl JsonRpcLedger {
    pub fn new(url: impl Into<String>, commitment: Commitment) -> Self {
        Self {
            http: Client::new(),
            url: url.into(),
            commitment,
            timeout: DEFAULT_RPC_TIMEOUT,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<P, T>(&self, method: &str, params: P) -> Result<T>
    where
        P: Serialize + Send + Sync,
        T: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, url = %self.url, "sending json-rpc request");

        let response = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(&RpcRequest::new(id, method, params))
            .send()
            .await
            .map_err(|err| CounterError::Network(format!("{method} request failed: {err}")))?
            .error_for_status()
            .map_err(|err| CounterError::Network(format!("{method} returned {err}")))?;

        let body: RpcResponse<T> = response.json().await.map_err(|err| {
            CounterError::Decode(format!("invalid {method} response body: {err}"))
        })?;

        if let Some(error) = body.error {
            return Err(error.into());
        }
        body.result.ok_or_else(|| {
            CounterError::Decode(format!("{method} response carried neither result nor error"))
        })
    }
}

fn decode_rpc_account(account: RpcAccount) -> Result<AccountPayload> {
    let (payload, encoding) = account.data;
    if encoding != "base64" {
        return Err(CounterError::Decode(format!(
            "unexpected account data encoding '{encoding}'"
        )));
    }
    let data = STANDARD
        .decode(payload)
        .map_err(|err| CounterError::Decode(format!("account data is not base64: {err}")))?;
    let owner = account
        .owner
        .parse::<Address>()
        .map_err(|err| CounterError::Decode(format!("invalid account owner: {err}")))?;

    Ok(AccountPayload {
        owner,
        lamports: account.lamports,
        data,
    })
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
    async fn fetch_account(&self, address: &Address) -> Result<AccountPayload> {
        let params = (
            address.to_string(),
            AccountInfoConfig {
                encoding: "base64",
                commitment: self.commitment.as_str(),
            },
        );
        let response: RpcContextValue<Option<RpcAccount>> =
            self.call("getAccountInfo", params).await?;

        match response.value {
            Some(account) => decode_rpc_account(account),
            None => Err(CounterError::AccountNotFound(address.to_string())),
        }
    }

    async fn get_balance(&self, address: &Address) -> Result<Lamports> {
        let params = (
            address.to_string(),
            CommitmentConfig {
                commitment: self.commitment.as_str(),
            },
        );
        let response: RpcContextValue<u64> = self.call("getBalance", params).await?;
        Ok(Lamports(response.value))
    }
}

#[cfg(test)]
#[path = "tests/rpc_tests.rs"]
mod tests;
