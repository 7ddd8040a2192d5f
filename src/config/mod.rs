use garde::Validate;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OracleConfig {
    /// JSON-RPC endpoint of the ledger node
    #[garde(length(min = 1))]
    pub rpc_url: String,

    /// Address of the escrow contract (0x-prefixed hex)
    #[garde(length(min = 1))]
    pub contract_address: String,

    /// Hex-encoded secp256k1 key the oracle signs verdicts with
    #[garde(length(min = 1))]
    pub agent_private_key: String,

    /// Base URL of the IPFS HTTP API (e.g. "http://127.0.0.1:5001")
    #[garde(length(min = 1))]
    pub ipfs_api_url: String,

    /// Path to the contract ABI or build artifact JSON
    #[garde(length(min = 1))]
    pub contract_abi_path: String,

    /// API key for the feasibility advisory model
    #[garde(length(min = 1))]
    pub advisory_api_key: String,

    #[serde(default = "default_advisory_api_url")]
    #[garde(length(min = 1))]
    pub advisory_api_url: String,

    #[serde(default = "default_advisory_model")]
    #[garde(length(min = 1))]
    pub advisory_model: String,

    /// Minimum total coverage (percent) for a submission to be approved
    #[serde(default = "default_minimum_coverage")]
    #[garde(range(min = 0.0, max = 100.0))]
    pub minimum_coverage_percentage: f64,

    #[serde(default = "default_poll_interval_secs")]
    #[garde(range(min = 1))]
    pub poll_interval_secs: u64,

    #[serde(default = "default_reconnect_cooldown_secs")]
    #[garde(range(min = 1))]
    pub reconnect_cooldown_secs: u64,

    #[serde(default = "default_ipfs_timeout_secs")]
    #[garde(range(min = 1))]
    pub ipfs_timeout_secs: u64,

    #[serde(default = "default_rpc_timeout_secs")]
    #[garde(range(min = 1))]
    pub rpc_timeout_secs: u64,

    #[serde(default = "default_tx_confirm_timeout_secs")]
    #[garde(range(min = 1))]
    pub tx_confirm_timeout_secs: u64,

    #[serde(default = "default_tx_confirmations")]
    #[garde(range(min = 1))]
    pub tx_confirmations: usize,

    #[serde(default = "default_gas_limit")]
    #[garde(range(min = 21_000))]
    pub gas_limit: u64,

    /// Upper bound on the block span of a single log query
    #[serde(default = "default_max_block_range")]
    #[garde(range(min = 1))]
    pub max_block_range: u64,

    /// First block to scan; unset means "start at the current head"
    #[serde(default)]
    #[garde(skip)]
    pub start_block: Option<u64>,

    #[serde(default = "default_check_command")]
    #[garde(length(min = 1))]
    pub check_command: String,

    #[serde(default = "default_check_timeout_secs")]
    #[garde(range(min = 1))]
    pub check_timeout_secs: u64,

    /// Root for per-job scratch directories; defaults to the system temp dir
    #[serde(default)]
    #[garde(skip)]
    pub scratch_dir: Option<PathBuf>,

    /// API server bind address
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    /// Prometheus listener of the worker process
    #[serde(default = "default_worker_metrics_addr")]
    #[garde(length(min = 1))]
    pub worker_metrics_addr: String,
}

fn default_advisory_api_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_advisory_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_minimum_coverage() -> f64 {
    90.0
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_reconnect_cooldown_secs() -> u64 {
    10
}

fn default_ipfs_timeout_secs() -> u64 {
    30
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

fn default_tx_confirm_timeout_secs() -> u64 {
    300
}

fn default_tx_confirmations() -> usize {
    1
}

fn default_gas_limit() -> u64 {
    2_000_000
}

fn default_max_block_range() -> u64 {
    2048
}

fn default_check_command() -> String {
    "pytest".to_string()
}

fn default_check_timeout_secs() -> u64 {
    900
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}

impl OracleConfig {
    /// Load `.env` (if any) and the process environment, then validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Build from explicit key/value pairs. Blank values count as unset.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars
            .into_iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .collect();
        let config: OracleConfig = envy::from_iter(resolve_legacy_names(vars))?;

        config.validate()?;
        if config.reconnect_cooldown_secs <= config.poll_interval_secs {
            return Err(ConfigError::Inconsistent(format!(
                "RECONNECT_COOLDOWN_SECS ({}) must exceed POLL_INTERVAL_SECS ({})",
                config.reconnect_cooldown_secs, config.poll_interval_secs
            )));
        }

        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_secs(self.reconnect_cooldown_secs)
    }

    pub fn ipfs_timeout(&self) -> Duration {
        Duration::from_secs(self.ipfs_timeout_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn tx_confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.tx_confirm_timeout_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Variable names used by earlier deployments, with the name that replaced them.
const LEGACY_NAMES: &[(&str, &str)] = &[
    ("FUJI_RPC_URL", "RPC_URL"),
    ("AI_AGENT_PRIVATE_KEY", "AGENT_PRIVATE_KEY"),
    ("GOOGLE_API_KEY", "ADVISORY_API_KEY"),
];

/// Rename legacy keys to their current names. A legacy key is dropped when the
/// current name is also set.
fn resolve_legacy_names(vars: Vec<(String, String)>) -> Vec<(String, String)> {
    let present = |name: &str| vars.iter().any(|(k, _)| k.eq_ignore_ascii_case(name));
    let renames: Vec<(&str, Option<&str>)> = LEGACY_NAMES
        .iter()
        .map(|(legacy, current)| (*legacy, (!present(current)).then_some(*current)))
        .collect();

    vars.into_iter()
        .filter_map(|(key, value)| {
            match renames
                .iter()
                .find(|(legacy, _)| key.eq_ignore_ascii_case(legacy))
            {
                Some((_, Some(current))) => Some((current.to_string(), value)),
                Some((_, None)) => None,
                None => Some((key, value)),
            }
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing or malformed environment variable: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),

    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Vec<(String, String)> {
        [
            ("RPC_URL", "http://127.0.0.1:8545"),
            ("CONTRACT_ADDRESS", "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            ("AGENT_PRIVATE_KEY", "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"),
            ("IPFS_API_URL", "http://127.0.0.1:5001"),
            ("CONTRACT_ABI_PATH", "/etc/oracle/Escrow.json"),
            ("ADVISORY_API_KEY", "test-key"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn with(mut vars: Vec<(String, String)>, key: &str, value: &str) -> Vec<(String, String)> {
        vars.retain(|(k, _)| k != key);
        vars.push((key.to_string(), value.to_string()));
        vars
    }

    #[test]
    fn test_defaults_applied() {
        let config = OracleConfig::from_vars(required()).unwrap();
        assert_eq!(config.minimum_coverage_percentage, 90.0);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.reconnect_cooldown(), Duration::from_secs(10));
        assert_eq!(config.ipfs_timeout(), Duration::from_secs(30));
        assert_eq!(config.gas_limit, 2_000_000);
        assert_eq!(config.check_command, "pytest");
        assert!(config.start_block.is_none());
    }

    #[test]
    fn test_explicit_values_override_defaults() {
        let vars = with(required(), "MINIMUM_COVERAGE_PERCENTAGE", "85");
        let vars = with(vars, "START_BLOCK", "1200");
        let config = OracleConfig::from_vars(vars).unwrap();
        assert_eq!(config.minimum_coverage_percentage, 85.0);
        assert_eq!(config.start_block, Some(1200));
    }

    #[test]
    fn test_blank_optional_falls_back_to_default() {
        let vars = with(required(), "MINIMUM_COVERAGE_PERCENTAGE", "");
        let config = OracleConfig::from_vars(vars).unwrap();
        assert_eq!(config.minimum_coverage_percentage, 90.0);
    }

    #[test]
    fn test_blank_required_value_is_rejected() {
        let vars = with(required(), "CONTRACT_ADDRESS", "");
        let err = OracleConfig::from_vars(vars).unwrap_err();
        assert!(matches!(err, ConfigError::Env(_)));
        assert!(err.to_string().contains("contract_address"));
    }

    #[test]
    fn test_legacy_names_accepted() {
        let mut vars: Vec<_> = required()
            .into_iter()
            .filter(|(k, _)| k != "RPC_URL" && k != "ADVISORY_API_KEY")
            .collect();
        vars.push(("FUJI_RPC_URL".into(), "https://api.avax-test.network/ext/bc/C/rpc".into()));
        vars.push(("GOOGLE_API_KEY".into(), "legacy".into()));
        let config = OracleConfig::from_vars(vars).unwrap();
        assert!(config.rpc_url.contains("avax-test"));
        assert_eq!(config.advisory_api_key, "legacy");
    }

    #[test]
    fn test_current_name_wins_over_legacy_name() {
        let vars = with(required(), "FUJI_RPC_URL", "https://api.avax-test.network/ext/bc/C/rpc");
        let vars = with(vars, "GOOGLE_API_KEY", "legacy");
        let config = OracleConfig::from_vars(vars).unwrap();
        assert_eq!(config.rpc_url, "http://127.0.0.1:8545");
        assert_eq!(config.advisory_api_key, "test-key");
    }

    #[test]
    fn test_blank_current_name_falls_back_to_legacy_name() {
        let vars = with(required(), "AGENT_PRIVATE_KEY", "");
        let vars = with(vars, "AI_AGENT_PRIVATE_KEY", "0xlegacy");
        let config = OracleConfig::from_vars(vars).unwrap();
        assert_eq!(config.agent_private_key, "0xlegacy");
    }

    #[test]
    fn test_threshold_out_of_range() {
        let vars = with(required(), "MINIMUM_COVERAGE_PERCENTAGE", "120");
        assert!(matches!(
            OracleConfig::from_vars(vars),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_cooldown_must_exceed_poll_interval() {
        let vars = with(required(), "RECONNECT_COOLDOWN_SECS", "5");
        assert!(matches!(
            OracleConfig::from_vars(vars),
            Err(ConfigError::Inconsistent(_))
        ));
    }
}
