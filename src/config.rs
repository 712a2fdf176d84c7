//! Configuration Management
//!
//! Handles persistent configuration storage for cloudscan.

use crate::engine::query::DEFAULT_MAX_CONCURRENCY;
use crate::engine::Partition;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Region patterns to query (`us-*`, `eu-west-1`, `*`)
    #[serde(default)]
    pub regions: Vec<String>,
    /// Region used to pick the partition and as the default scope
    #[serde(default)]
    pub client_region: Option<String>,
    /// Error codes ignored for every table
    #[serde(default)]
    pub ignore_error_codes: Vec<String>,
    /// Hydrate worker pool size
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Endpoint template for the HTTP provider
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cloudscan").join("config.json"))
    }

    /// Load configuration from disk; a missing or unreadable file yields defaults
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config {}: {:#}", path.display(), e);
                Self::default()
            },
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get effective client region (CLI > config > AWS_REGION > AWS_DEFAULT_REGION > us-east-1)
    pub fn effective_client_region(&self, cli: Option<&str>) -> String {
        cli.map(String::from)
            .or_else(|| self.client_region.clone())
            .or_else(|| env_region("AWS_REGION"))
            .or_else(|| env_region("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|| Partition::Aws.default_region().to_string())
    }

    /// Get effective region patterns (CLI > config); empty means the client region
    pub fn effective_regions(&self, cli: &[String]) -> Vec<String> {
        if cli.is_empty() {
            self.regions.clone()
        } else {
            cli.to_vec()
        }
    }

    /// Get effective hydrate concurrency (CLI > config > default)
    pub fn effective_max_concurrency(&self, cli: Option<usize>) -> usize {
        cli.or(self.max_concurrency)
            .unwrap_or(DEFAULT_MAX_CONCURRENCY)
            .max(1)
    }

    /// Get effective endpoint template (CLI > config)
    pub fn effective_endpoint(&self, cli: Option<&str>) -> Option<String> {
        cli.map(String::from).or_else(|| self.endpoint.clone())
    }
}

fn env_region(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_wins_over_config() {
        let config = Config {
            client_region: Some("eu-west-1".to_string()),
            max_concurrency: Some(4),
            ..Default::default()
        };
        assert_eq!(config.effective_client_region(Some("ap-south-1")), "ap-south-1");
        assert_eq!(config.effective_client_region(None), "eu-west-1");
        assert_eq!(config.effective_max_concurrency(Some(2)), 2);
        assert_eq!(config.effective_max_concurrency(None), 4);
    }

    #[test]
    fn test_regions_precedence() {
        let config = Config {
            regions: vec!["us-*".to_string()],
            ..Default::default()
        };
        assert_eq!(config.effective_regions(&[]), vec!["us-*"]);
        assert_eq!(config.effective_regions(&["eu-*".to_string()]), vec!["eu-*"]);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = std::env::temp_dir().join(format!("cloudscan-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");
        let config = Config {
            regions: vec!["us-east-1".to_string()],
            ignore_error_codes: vec!["AccessDenied*".to_string()],
            endpoint: Some("http://localhost:4566".to_string()),
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"regions": ["*"]}"#).unwrap();
        assert_eq!(config.regions, vec!["*"]);
        assert!(config.endpoint.is_none());
        assert_eq!(config.effective_max_concurrency(None), DEFAULT_MAX_CONCURRENCY);
    }
}
