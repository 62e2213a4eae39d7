use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use primitive_types::U256;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::sleep;
use url::Url;

use lumino_common::crypto::{Commitment, Secret};
use lumino_common::epoch::{EpochPhase, EpochState};
use lumino_common::job::Job;

use super::{LedgerClient, LedgerError, LedgerEvent, NodeInfo, TxReceipt};

/// Retry and timeout knobs for the JSON-RPC gateway connection.
#[derive(Debug, Clone)]
pub struct LedgerRpcConfig {
    pub request_timeout: Duration,
    pub connection_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for LedgerRpcConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: u32,
    method: String,
    params: Value,
}

#[derive(Debug, serde::Deserialize)]
#[allow(dead_code)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: u32,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, serde::Deserialize)]
#[allow(dead_code)]
struct JsonRpcError {
    code: i32,
    message: String,
    data: Option<Value>,
}

/// Reference implementation of [`LedgerClient`] against the contracts
/// gateway: a JSON-RPC sidecar that owns the signing key, ABI encoding and
/// nonce management. Every mutation here maps to one gateway method that
/// either lands on the ledger or returns a JSON-RPC error.
pub struct JsonRpcLedger {
    client: Client,
    base_url: Url,
    config: LedgerRpcConfig,
    address: String,
    /// Cursor into the gateway's decoded event log; advanced by
    /// `process_events`.
    event_cursor: Mutex<u64>,
}

impl JsonRpcLedger {
    /// Connect to the gateway and resolve the signer address it submits
    /// from.
    pub async fn connect(rpc_url: &str, config: LedgerRpcConfig) -> Result<Self, LedgerError> {
        let base_url = if rpc_url.starts_with("http://") || rpc_url.starts_with("https://") {
            Url::parse(rpc_url)
        } else {
            Url::parse(&format!("http://{rpc_url}"))
        }
        .map_err(|e| LedgerError::Transport(format!("invalid RPC URL '{rpc_url}': {e}")))?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connection_timeout)
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let ledger = Self {
            client,
            base_url,
            config,
            address: String::new(),
            event_cursor: Mutex::new(0),
        };

        let address = ledger
            .call("get_signer_address", Value::Null)
            .await?
            .as_str()
            .ok_or_else(|| LedgerError::Decode("signer address is not a string".into()))?
            .to_string();

        Ok(Self { address, ..ledger })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: rand::random::<u32>(),
            method: method.to_string(),
            params,
        };

        let url = self
            .base_url
            .join("json_rpc")
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        debug!("Ledger RPC {method} -> {url}");

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                warn!(
                    "Retrying {method} (attempt {attempt}/{})",
                    self.config.max_retries
                );
                sleep(self.config.retry_delay).await;
            }

            match self.call_once(&url, &request).await {
                Ok(result) => return Ok(result),
                // A contract rejection is final: the ledger has spoken, and
                // resubmitting the same call cannot change the outcome.
                Err(e @ LedgerError::Contract(_)) => return Err(e),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| LedgerError::Transport(format!("{method}: no attempt made"))))
    }

    async fn call_once(&self, url: &Url, request: &JsonRpcRequest) -> Result<Value, LedgerError> {
        let response = self
            .client
            .post(url.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LedgerError::Transport(format!(
                        "request timeout after {:?}",
                        self.config.request_timeout
                    ))
                } else if e.is_connect() {
                    LedgerError::Transport(format!("connection failed: {e}"))
                } else {
                    LedgerError::Transport(format!("network error: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(LedgerError::Transport(format!(
                "HTTP error {}",
                response.status().as_u16()
            )));
        }

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Decode(format!("invalid JSON-RPC response: {e}")))?;

        if let Some(error) = rpc_response.error {
            return Err(LedgerError::Contract(format!(
                "{} (code {})",
                error.message, error.code
            )));
        }

        rpc_response
            .result
            .ok_or_else(|| LedgerError::Decode("no result in response".into()))
    }

    /// Issue a mutation and discard the receipt body.
    async fn transact(&self, method: &str, params: Value) -> Result<(), LedgerError> {
        self.call(method, params).await.map(|_| ())
    }

    fn decode_u256(value: &Value, what: &str) -> Result<U256, LedgerError> {
        match value {
            Value::String(s) => U256::from_dec_str(s)
                .map_err(|e| LedgerError::Decode(format!("{what}: {e}"))),
            Value::Number(n) => n
                .as_u64()
                .map(U256::from)
                .ok_or_else(|| LedgerError::Decode(format!("{what}: not a u64"))),
            other => Err(LedgerError::Decode(format!(
                "{what}: unexpected value {other}"
            ))),
        }
    }

    fn decode_u64(value: &Value, what: &str) -> Result<u64, LedgerError> {
        value
            .as_u64()
            .ok_or_else(|| LedgerError::Decode(format!("{what}: not a u64")))
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
    fn address(&self) -> &str {
        &self.address
    }

    async fn get_stake_balance(&self, address: &str) -> Result<U256, LedgerError> {
        let result = self
            .call("get_stake_balance", json!({ "address": address }))
            .await?;
        Self::decode_u256(&result, "stake balance")
    }

    async fn get_token_balance(&self, address: &str) -> Result<U256, LedgerError> {
        let result = self
            .call("get_token_balance", json!({ "address": address }))
            .await?;
        Self::decode_u256(&result, "token balance")
    }

    async fn get_current_epoch(&self) -> Result<u64, LedgerError> {
        let result = self.call("get_current_epoch", Value::Null).await?;
        Self::decode_u64(&result, "current epoch")
    }

    async fn get_epoch_state(&self) -> Result<EpochState, LedgerError> {
        let result = self.call("get_epoch_state", Value::Null).await?;
        let phase = Self::decode_u64(&result["phase"], "epoch phase")?;
        let time_left = Self::decode_u64(&result["time_left"], "epoch time left")?;
        let phase = EpochPhase::try_from(phase as u8)
            .map_err(|e| LedgerError::Decode(e.to_string()))?;
        Ok(EpochState::new(phase, Duration::from_secs(time_left)))
    }

    async fn get_current_leader(&self) -> Result<u64, LedgerError> {
        let result = self.call("get_current_leader", Value::Null).await?;
        Self::decode_u64(&result, "current leader")
    }

    async fn get_jobs_by_node(&self, node_id: u64) -> Result<Vec<Job>, LedgerError> {
        let result = self
            .call("get_jobs_by_node", json!({ "node_id": node_id }))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| LedgerError::Decode(format!("job list: {e}")))
    }

    async fn get_node_info(&self, node_id: u64) -> Result<NodeInfo, LedgerError> {
        let result = self
            .call("get_node_info", json!({ "node_id": node_id }))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| LedgerError::Decode(format!("node info: {e}")))
    }

    async fn approve_token_spending(
        &self,
        spender: &str,
        amount: U256,
    ) -> Result<(), LedgerError> {
        self.transact(
            "approve_token_spending",
            json!({ "spender": spender, "amount": amount.to_string() }),
        )
        .await
    }

    async fn deposit_stake(&self, amount: U256) -> Result<(), LedgerError> {
        self.transact("deposit_stake", json!({ "amount": amount.to_string() }))
            .await
    }

    async fn register_node(&self, compute_rating: u64) -> Result<TxReceipt, LedgerError> {
        let result = self
            .call("register_node", json!({ "compute_rating": compute_rating }))
            .await?;
        let tx_hash = result["tx_hash"].as_str().unwrap_or_default().to_string();
        let events = result["events"]
            .as_array()
            .map(|events| events.iter().map(LedgerEvent::decode).collect())
            .unwrap_or_default();
        Ok(TxReceipt { tx_hash, events })
    }

    async fn submit_commitment(
        &self,
        node_id: u64,
        commitment: &Commitment,
    ) -> Result<(), LedgerError> {
        self.transact(
            "submit_commitment",
            json!({ "node_id": node_id, "commitment": commitment.to_hex() }),
        )
        .await
    }

    async fn reveal_secret(&self, node_id: u64, secret: &Secret) -> Result<(), LedgerError> {
        self.transact(
            "reveal_secret",
            json!({ "node_id": node_id, "secret": hex::encode(secret.as_bytes()) }),
        )
        .await
    }

    async fn elect_leader(&self) -> Result<(), LedgerError> {
        self.transact("elect_leader", Value::Null).await
    }

    async fn start_assignment_round(&self) -> Result<(), LedgerError> {
        self.transact("start_assignment_round", Value::Null).await
    }

    async fn confirm_job(&self, job_id: u64) -> Result<(), LedgerError> {
        self.transact("confirm_job", json!({ "job_id": job_id })).await
    }

    async fn set_token_count_for_job(&self, job_id: u64, count: u64) -> Result<(), LedgerError> {
        self.transact(
            "set_token_count_for_job",
            json!({ "job_id": job_id, "token_count": count }),
        )
        .await
    }

    async fn complete_job(&self, job_id: u64) -> Result<(), LedgerError> {
        self.transact("complete_job", json!({ "job_id": job_id })).await
    }

    async fn fail_job(&self, job_id: u64, reason: &str) -> Result<(), LedgerError> {
        self.transact("fail_job", json!({ "job_id": job_id, "reason": reason }))
            .await
    }

    async fn process_job_payment(&self, job_id: u64) -> Result<(), LedgerError> {
        self.transact("process_job_payment", json!({ "job_id": job_id }))
            .await
    }

    async fn process_incentives(&self) -> Result<(), LedgerError> {
        self.transact("process_incentives", Value::Null).await
    }

    async fn setup_event_filters(&self) -> Result<(), LedgerError> {
        let result = self.call("setup_event_filters", Value::Null).await?;
        let cursor = Self::decode_u64(&result, "event cursor")?;
        *self.event_cursor.lock().expect("event cursor lock") = cursor;
        Ok(())
    }

    async fn process_events(&self) -> Result<usize, LedgerError> {
        let since = *self.event_cursor.lock().expect("event cursor lock");
        let result = self
            .call("get_events", json!({ "since": since }))
            .await?;

        let events: Vec<LedgerEvent> = result["events"]
            .as_array()
            .map(|events| events.iter().map(LedgerEvent::decode).collect())
            .unwrap_or_default();
        for event in &events {
            event.log();
        }

        let cursor = Self::decode_u64(&result["cursor"], "event cursor")?;
        *self.event_cursor.lock().expect("event cursor lock") = cursor;
        Ok(events.len())
    }
}

impl std::fmt::Debug for JsonRpcLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcLedger")
            .field("base_url", &self.base_url)
            .field("address", &self.address)
            .finish()
    }
}
