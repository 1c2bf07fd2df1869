//! Configuration management for the transaction manager
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub api: ApiConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub fees: FeeConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    /// Contract ABI location, passed through for callers that build call data
    pub abi_filepath: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Gas limit multiplier applied to estimates
    pub gas_multiplier: f64,
    /// Percent added on top of `eth_gasPrice` for legacy pricing
    pub avg_gas_price_inc_percent: u64,
    pub disable_gas_estimation: bool,
    /// Base gas limit used when estimation is disabled and the request names none
    pub fallback_gas_limit: u64,
    /// Price with maxFeePerGas/maxPriorityFeePerGas when the request gives no gasPrice
    pub default_fee_market: bool,
    /// Fee history reward percentile used for the priority tip
    pub target_reward_percentile: f64,
    pub max_fee_per_gas_gwei: Option<u64>,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            gas_multiplier: 1.2,
            avg_gas_price_inc_percent: 50,
            disable_gas_estimation: false,
            fallback_gas_limit: 21_000,
            default_fee_market: false,
            target_reward_percentile: 60.0,
            max_fee_per_gas_gwei: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub blocks: u64,
    pub max_waiting_time_secs: u64,
    pub poll_interval_ms: u64,
}

impl ConfirmationConfig {
    pub fn max_waiting_time(&self) -> Duration {
        Duration::from_secs(self.max_waiting_time_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            blocks: 6,
            max_waiting_time_secs: 600,
            poll_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Name of the environment variable holding the hex private key
    pub private_key_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: "TXM_PRIVATE_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9100
}

impl Settings {
    /// Load settings from the file named by `TXM_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("TXM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    fn parse(raw: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw)?;

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.chain.rpc_url.is_empty() {
            anyhow::bail!("chain.rpc_url must be set");
        }
        if !(self.fees.gas_multiplier.is_finite() && self.fees.gas_multiplier > 0.0) {
            anyhow::bail!(
                "fees.gas_multiplier must be a positive number, got {}",
                self.fees.gas_multiplier
            );
        }
        if !(0.0..=100.0).contains(&self.fees.target_reward_percentile) {
            anyhow::bail!(
                "fees.target_reward_percentile must be within 0..=100, got {}",
                self.fees.target_reward_percentile
            );
        }
        if self.confirmation.poll_interval_ms == 0 {
            anyhow::bail!("confirmation.poll_interval_ms must be positive");
        }
        if self.chain.abi_filepath.is_none() {
            tracing::debug!("No contract ABI configured");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [api]
        host = "127.0.0.1"
        port = 3008

        [chain]
        rpc_url = "http://localhost:8545"
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TXM_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TXM_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let settings = Settings::parse(MINIMAL).unwrap();
        assert_eq!(settings.api.port, 3008);
        assert_eq!(settings.fees.avg_gas_price_inc_percent, 50);
        assert!(!settings.fees.disable_gas_estimation);
        assert_eq!(settings.confirmation.poll_interval(), Duration::from_secs(1));
        assert_eq!(settings.wallet.private_key_env, "TXM_PRIVATE_KEY");
        assert!(!settings.metrics.enabled);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [api]
            host = "0.0.0.0"
            port = 8080

            [chain]
            rpc_url = "http://node:8545"

            [fees]
            gas_multiplier = 1.5
            avg_gas_price_inc_percent = 10
            default_fee_market = true

            [confirmation]
            blocks = 12
            max_waiting_time_secs = 30
            "#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.fees.avg_gas_price_inc_percent, 10);
        assert!(settings.fees.default_fee_market);
        assert_eq!(settings.confirmation.blocks, 12);
        assert_eq!(settings.confirmation.max_waiting_time(), Duration::from_secs(30));
        // Unset keys inside a present section keep their defaults
        assert_eq!(settings.confirmation.poll_interval_ms, 1_000);
    }

    #[test]
    fn test_rejects_bad_multiplier() {
        let raw = format!("{MINIMAL}\n[fees]\ngas_multiplier = 0.0\n");
        assert!(Settings::parse(&raw).is_err());
    }
}
