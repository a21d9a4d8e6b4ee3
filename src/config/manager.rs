#![allow(dead_code)]
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use serde::Serialize;
use tracing::info;

use super::runner::{PollingSettings, RiskSettings, RunnerConfig, StrategySettings};

#[derive(Debug, Clone, Serialize)]
pub enum ConfigChangeEvent {
    StrategyUpdated(StrategySettings),
    RiskUpdated(RiskSettings),
    PollingUpdated(PollingSettings),
    FullConfigUpdated,
}

/// Owns the live `RunnerConfig` and applies updates with a validate-then-
/// commit-or-revert policy so an invalid partial update never takes effect.
pub struct RunnerConfigManager {
    config: Arc<RwLock<RunnerConfig>>,
    change_tx: broadcast::Sender<ConfigChangeEvent>,
}

impl RunnerConfigManager {
    pub fn new(initial: RunnerConfig) -> Self {
        let (change_tx, _) = broadcast::channel(32);
        Self {
            config: Arc::new(RwLock::new(initial)),
            change_tx,
        }
    }

    pub async fn get_config(&self) -> RunnerConfig {
        self.config.read().await.clone()
    }

    pub async fn update_strategy(&self, settings: StrategySettings) -> Result<(), String> {
        let mut config = self.config.write().await;
        let previous = config.strategy.clone();
        config.strategy = settings.clone();

        if let Err(errors) = config.validate() {
            config.strategy = previous;
            return Err(errors.join(", "));
        }

        info!(
            sl_points = %settings.sl_points,
            trail_points = %settings.trail_points,
            "strategy settings updated"
        );
        let _ = self.change_tx.send(ConfigChangeEvent::StrategyUpdated(settings));
        Ok(())
    }

    pub async fn update_risk(&self, settings: RiskSettings) -> Result<(), String> {
        let mut config = self.config.write().await;
        let previous = config.risk.clone();
        config.risk = settings.clone();

        if let Err(errors) = config.validate() {
            config.risk = previous;
            return Err(errors.join(", "));
        }

        info!(
            daily_loss_limit_pct = %settings.daily_loss_limit_pct,
            max_concurrent_positions = settings.max_concurrent_positions,
            "risk settings updated"
        );
        let _ = self.change_tx.send(ConfigChangeEvent::RiskUpdated(settings));
        Ok(())
    }

    pub async fn update_polling(&self, settings: PollingSettings) -> Result<(), String> {
        let mut config = self.config.write().await;
        let previous = config.polling.clone();
        config.polling = settings.clone();

        if let Err(errors) = config.validate() {
            config.polling = previous;
            return Err(errors.join(", "));
        }

        info!("polling settings updated");
        let _ = self.change_tx.send(ConfigChangeEvent::PollingUpdated(settings));
        Ok(())
    }

    pub async fn update_full(&self, new_config: RunnerConfig) -> Result<(), String> {
        if let Err(errors) = new_config.validate() {
            return Err(errors.join(", "));
        }

        let mut config = self.config.write().await;
        *config = new_config;

        info!("full configuration updated");
        let _ = self.change_tx.send(ConfigChangeEvent::FullConfigUpdated);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.change_tx.subscribe()
    }

    pub fn config_arc(&self) -> Arc<RwLock<RunnerConfig>> {
        Arc::clone(&self.config)
    }
}

impl Clone for RunnerConfigManager {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            change_tx: self.change_tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_update_reverts() {
        let manager = RunnerConfigManager::new(RunnerConfig::default());
        let mut bad = manager.get_config().await.strategy;
        bad.sl_points = rust_decimal::Decimal::ZERO;

        let result = manager.update_strategy(bad).await;
        assert!(result.is_err());

        let config = manager.get_config().await;
        assert_eq!(config.strategy.sl_points, RunnerConfig::default().strategy.sl_points);
    }
}
