use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use veloz_risk::{breaker::TradingBreakerConfig, engine::RiskConfig};
use veloz_wal::WalConfig;

/// Market data source of a run.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketSource {
    Sim,
    BinanceRest,
    BinanceWs,
}

/// Execution target of a run.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    SimEngine,
    BinanceSpotLive,
    BinanceTestnetSpot,
}

/// Engine configuration assembled from the environment.
///
/// Environment names are normative for the deployment tooling:
/// `VELOZ_DATA_DIR`, `VELOZ_MARKET_SOURCE`, `VELOZ_EXECUTION_MODE`, `VELOZ_MAX_RETRIES`,
/// `VELOZ_WAL_FSYNC_BATCH_MS`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub market_source: MarketSource,
    pub execution_mode: ExecutionMode,
    pub max_retries: u32,
    pub wal_fsync_batch: Duration,
    pub reconcile_interval: Duration,
    /// Parked receipts referencing an unknown venue order id expire after this window.
    pub orphan_receipt_ttl: Duration,
    pub risk: RiskConfig,
    pub trading_breaker: TradingBreakerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./veloz-data"),
            market_source: MarketSource::Sim,
            execution_mode: ExecutionMode::SimEngine,
            max_retries: 3,
            wal_fsync_batch: Duration::from_millis(2),
            reconcile_interval: Duration::from_secs(30),
            orphan_receipt_ttl: Duration::from_secs(60),
            risk: RiskConfig::default(),
            trading_breaker: TradingBreakerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read configuration from `VELOZ_*` environment variables, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self, EngineError> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("VELOZ_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Ok(source) = std::env::var("VELOZ_MARKET_SOURCE") {
            config.market_source = parse_variant(&source, "VELOZ_MARKET_SOURCE")?;
        }

        if let Ok(mode) = std::env::var("VELOZ_EXECUTION_MODE") {
            config.execution_mode = parse_variant(&mode, "VELOZ_EXECUTION_MODE")?;
        }

        if let Ok(retries) = std::env::var("VELOZ_MAX_RETRIES") {
            config.max_retries = retries.parse().map_err(|_| {
                EngineError::Config(format!("VELOZ_MAX_RETRIES invalid: {retries}"))
            })?;
        }

        if let Ok(batch_ms) = std::env::var("VELOZ_WAL_FSYNC_BATCH_MS") {
            let millis: u64 = batch_ms.parse().map_err(|_| {
                EngineError::Config(format!("VELOZ_WAL_FSYNC_BATCH_MS invalid: {batch_ms}"))
            })?;
            config.wal_fsync_batch = Duration::from_millis(millis);
        }

        Ok(config)
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal")
    }

    pub fn positions_dir(&self) -> PathBuf {
        self.data_dir.join("positions")
    }

    pub fn wal_config(&self) -> WalConfig {
        let mut wal = WalConfig::new(self.wal_dir());
        wal.batch_max_wait = self.wal_fsync_batch;
        wal
    }
}

fn parse_variant<T: serde::de::DeserializeOwned>(raw: &str, name: &str) -> Result<T, EngineError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| EngineError::Config(format!("{name} invalid: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        assert_eq!(
            parse_variant::<MarketSource>("binance_rest", "x").unwrap(),
            MarketSource::BinanceRest
        );
        assert_eq!(
            parse_variant::<ExecutionMode>("sim_engine", "x").unwrap(),
            ExecutionMode::SimEngine
        );
        assert!(parse_variant::<ExecutionMode>("nonsense", "x").is_err());
    }
}
