use async_trait::async_trait;
use ethers::abi::{Abi, RawLog, Token};
use ethers::contract::Contract;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Filter, TransactionRequest, U256};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::OracleConfig;
use crate::models::event::{ContractCall, EventKind, LedgerEvent, TxReceipt, WorkSubmitted};
use crate::models::job::{DecodeError, JobSnapshot};

type SignedClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Live view of one contract on one ledger connection.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Height of the latest block.
    async fn current_block(&self) -> Result<u64, LedgerError>;

    /// Events of `kind` emitted in blocks `from..=to`, in no particular order.
    async fn poll_events(
        &self,
        kind: EventKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<LedgerEvent>, LedgerError>;

    /// Point-in-time read of a job record. May be stale.
    async fn read_job(&self, job_id: u64) -> Result<JobSnapshot, LedgerError>;

    /// Build, sign, broadcast and wait for confirmation of one call.
    ///
    /// A mined-but-reverted transaction is returned as a receipt with
    /// `success == false`.
    async fn submit(&self, call: ContractCall) -> Result<TxReceipt, LedgerError>;
}

/// Produces fresh ledger handles. Each call returns a fully new connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Ledger>, LedgerError>;
}

#[derive(Debug, Clone)]
pub struct EvmSettings {
    pub rpc_url: String,
    pub contract_address: Address,
    pub rpc_timeout: Duration,
    pub confirm_timeout: Duration,
    pub confirmations: usize,
    pub gas_limit: u64,
}

/// Connects to an EVM JSON-RPC endpoint and binds the escrow contract.
pub struct EvmConnector {
    settings: EvmSettings,
    abi: Abi,
    wallet: LocalWallet,
}

impl EvmConnector {
    pub fn new(settings: EvmSettings, abi: Abi, wallet: LocalWallet) -> Self {
        Self {
            settings,
            abi,
            wallet,
        }
    }

    /// Parse contract metadata and the signing key from configuration.
    pub fn from_config(config: &OracleConfig) -> Result<Self, LedgerError> {
        let contract_address: Address = config
            .contract_address
            .parse()
            .map_err(|_| LedgerError::Config("CONTRACT_ADDRESS is not a valid address".into()))?;
        let wallet: LocalWallet = config
            .agent_private_key
            .parse()
            .map_err(|_| LedgerError::Config("AGENT_PRIVATE_KEY is not a valid key".into()))?;
        let abi = load_abi(Path::new(&config.contract_abi_path))?;

        let settings = EvmSettings {
            rpc_url: config.rpc_url.clone(),
            contract_address,
            rpc_timeout: config.rpc_timeout(),
            confirm_timeout: config.tx_confirm_timeout(),
            confirmations: config.tx_confirmations,
            gas_limit: config.gas_limit,
        };
        Ok(Self::new(settings, abi, wallet))
    }

    pub fn agent_address(&self) -> Address {
        self.wallet.address()
    }
}

#[async_trait]
impl Connector for EvmConnector {
    async fn connect(&self) -> Result<Arc<dyn Ledger>, LedgerError> {
        info!(rpc_url = %self.settings.rpc_url, "Connecting to ledger");

        let provider = Provider::<Http>::try_from(self.settings.rpc_url.as_str())
            .map_err(|e| LedgerError::Config(format!("invalid RPC URL: {}", e)))?
            .interval(Duration::from_millis(500));

        let chain_id = with_timeout(self.settings.rpc_timeout, "eth_chainId", provider.get_chainid())
            .await?;
        let wallet = self.wallet.clone().with_chain_id(chain_id.as_u64());
        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let contract = Contract::new(
            self.settings.contract_address,
            self.abi.clone(),
            Arc::clone(&client),
        );

        info!(
            chain_id = chain_id.as_u64(),
            contract = ?self.settings.contract_address,
            agent = ?self.wallet.address(),
            "Ledger connection established"
        );

        Ok(Arc::new(EvmLedger {
            client,
            contract,
            settings: self.settings.clone(),
        }))
    }
}

/// One established connection. Never repaired in place; replaced on failure.
pub struct EvmLedger {
    client: Arc<SignedClient>,
    contract: Contract<SignedClient>,
    settings: EvmSettings,
}

impl EvmLedger {
    fn decode_log(
        &self,
        kind: EventKind,
        log: &ethers::types::Log,
    ) -> Result<LedgerEvent, LedgerError> {
        let event = self.contract.abi().event(kind.as_ref())?;
        let parsed = event.parse_log(RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        })?;
        let tokens: Vec<Token> = parsed.params.into_iter().map(|p| p.value).collect();

        let block_number = log
            .block_number
            .ok_or_else(|| LedgerError::Decode("log without block number".into()))?
            .as_u64();
        let log_index = log.log_index.map(|i| i.as_u64()).unwrap_or_default();

        match kind {
            EventKind::WorkSubmitted => Ok(LedgerEvent::WorkSubmitted(
                WorkSubmitted::from_tokens(tokens, block_number, log_index)?,
            )),
        }
    }
}

#[async_trait]
impl Ledger for EvmLedger {
    async fn current_block(&self) -> Result<u64, LedgerError> {
        let block = with_timeout(
            self.settings.rpc_timeout,
            "eth_blockNumber",
            self.client.get_block_number(),
        )
        .await?;
        Ok(block.as_u64())
    }

    async fn poll_events(
        &self,
        kind: EventKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        let signature = self.contract.abi().event(kind.as_ref())?.signature();
        let filter = Filter::new()
            .address(self.settings.contract_address)
            .topic0(signature)
            .from_block(from)
            .to_block(to);

        let logs = with_timeout(
            self.settings.rpc_timeout,
            "eth_getLogs",
            self.client.get_logs(&filter),
        )
        .await?;

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            match self.decode_log(kind, log) {
                Ok(event) => events.push(event),
                Err(e) => {
                    // Contract/ABI mismatch; retrying the range cannot fix it.
                    warn!(
                        event = %kind,
                        tx_hash = ?log.transaction_hash,
                        error = %e,
                        "Skipping undecodable log"
                    );
                    metrics::counter!("oracle_undecodable_logs_total").increment(1);
                }
            }
        }

        debug!(event = %kind, from, to, count = events.len(), "Polled events");
        Ok(events)
    }

    async fn read_job(&self, job_id: u64) -> Result<JobSnapshot, LedgerError> {
        let function = self.contract.abi().function("jobs")?;
        let data = function.encode_input(&[Token::Uint(U256::from(job_id))])?;
        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.settings.contract_address)
            .data(data)
            .into();

        let raw = with_timeout(self.settings.rpc_timeout, "eth_call", self.client.call(&tx, None))
            .await?;
        let tokens = function.decode_output(&raw)?;
        Ok(JobSnapshot::from_tokens(job_id, tokens)?)
    }

    async fn submit(&self, call: ContractCall) -> Result<TxReceipt, LedgerError> {
        let args = (U256::from(call.job_id()), call.flag());
        let method = self
            .contract
            .method::<_, ()>(call.function_name(), args)?
            .gas(self.settings.gas_limit);

        let pending = with_timeout(self.settings.rpc_timeout, "eth_sendRawTransaction", method.send())
            .await?;
        let tx_hash = pending.tx_hash();
        info!(call = ?call, tx_hash = ?tx_hash, "Transaction sent");

        let receipt = with_timeout(
            self.settings.confirm_timeout,
            "transaction confirmation",
            pending.confirmations(self.settings.confirmations),
        )
        .await?
        .ok_or_else(|| LedgerError::Transaction(format!("transaction {:?} was dropped", tx_hash)))?;

        let success = receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false);
        Ok(TxReceipt {
            tx_hash,
            block_number: receipt.block_number.map(|b| b.as_u64()),
            success,
        })
    }
}

/// Lazily connected handle for request/response callers.
///
/// On a connectivity failure the caller invalidates the handle; the next
/// `get` constructs a new connection and swaps it in.
pub struct SharedLedger {
    connector: Arc<dyn Connector>,
    current: RwLock<Option<Arc<dyn Ledger>>>,
}

impl SharedLedger {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            current: RwLock::new(None),
        }
    }

    pub async fn get(&self) -> Result<Arc<dyn Ledger>, LedgerError> {
        if let Some(ledger) = self.current.read().await.as_ref() {
            return Ok(Arc::clone(ledger));
        }

        let mut slot = self.current.write().await;
        if let Some(ledger) = slot.as_ref() {
            return Ok(Arc::clone(ledger));
        }
        let ledger = self.connector.connect().await?;
        *slot = Some(Arc::clone(&ledger));
        Ok(ledger)
    }

    pub async fn invalidate(&self) {
        self.current.write().await.take();
    }

    /// Run `op` against the current handle, dropping it if the failure is a connectivity one.
    pub async fn with<T, F, Fut>(&self, op: F) -> Result<T, LedgerError>
    where
        F: FnOnce(Arc<dyn Ledger>) -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let ledger = self.get().await?;
        let result = op(ledger).await;
        if let Err(e) = &result {
            if e.is_connectivity() {
                warn!(error = %e, "Dropping ledger connection");
                self.invalidate().await;
            }
        }
        result
    }
}

/// Read contract metadata: either a bare ABI array or a build artifact with an `abi` field.
pub fn load_abi(path: &Path) -> Result<Abi, LedgerError> {
    let bytes = std::fs::read(path).map_err(|e| {
        LedgerError::Config(format!("cannot read contract metadata {}: {}", path.display(), e))
    })?;
    parse_abi(&bytes)
}

pub fn parse_abi(bytes: &[u8]) -> Result<Abi, LedgerError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| LedgerError::Config(format!("contract metadata is not JSON: {}", e)))?;
    let abi_value = match value {
        serde_json::Value::Object(mut artifact) => artifact
            .remove("abi")
            .ok_or_else(|| LedgerError::Config("contract metadata has no `abi` field".into()))?,
        other => other,
    };
    let abi: Abi = serde_json::from_value(abi_value)
        .map_err(|e| LedgerError::Config(format!("invalid contract ABI: {}", e)))?;

    for function in ["jobs", "verifyWork", "resolveDispute"] {
        abi.function(function)
            .map_err(|_| LedgerError::Config(format!("contract ABI lacks `{}`", function)))?;
    }
    abi.event(EventKind::WorkSubmitted.as_ref())
        .map_err(|_| LedgerError::Config("contract ABI lacks `WorkSubmitted`".into()))?;
    Ok(abi)
}

async fn with_timeout<T, E, F>(limit: Duration, what: &'static str, fut: F) -> Result<T, LedgerError>
where
    E: std::fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(LedgerError::Connection(format!("{} failed: {}", what, e))),
        Err(_) => Err(LedgerError::Timeout(what)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger connection error: {0}")]
    Connection(String),

    #[error("Ledger call timed out: {0}")]
    Timeout(&'static str),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Failed to decode ledger data: {0}")]
    Decode(String),

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Ledger configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Faults that call for dropping the connection and starting over.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            LedgerError::Connection(_) | LedgerError::Timeout(_) | LedgerError::Transaction(_)
        )
    }
}

impl From<DecodeError> for LedgerError {
    fn from(e: DecodeError) -> Self {
        LedgerError::Decode(e.to_string())
    }
}

impl From<ethers::abi::Error> for LedgerError {
    fn from(e: ethers::abi::Error) -> Self {
        LedgerError::Abi(e.to_string())
    }
}

impl From<ethers::contract::AbiError> for LedgerError {
    fn from(e: ethers::contract::AbiError) -> Self {
        LedgerError::Abi(e.to_string())
    }
}
