//! Pool configuration.
//!
//! A [`PoolConfig`] can be built in code, read from a JSON file, or read
//! from `WORKPOOL_*` environment variables (callers usually load a `.env`
//! file with `dotenv` first).

use std::env;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pool::ResizePolicy;
use crate::{PoolError, Result};

pub const ENV_SIZE: &str = "WORKPOOL_SIZE";
pub const ENV_QUEUE_CAPACITY: &str = "WORKPOOL_QUEUE_CAPACITY";
pub const ENV_RESULT_CAPACITY: &str = "WORKPOOL_RESULT_CAPACITY";
pub const ENV_THREAD_NAME: &str = "WORKPOOL_THREAD_NAME";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    pub size: usize,
    /// Bound of the task queue, defaults to `size`.
    pub queue_capacity: Option<usize>,
    /// Bound of the result sink, defaults to `size`.
    pub result_capacity: Option<usize>,
    /// When false no results are published and task failures are only logged.
    pub collect_results: bool,
    pub thread_name: String,
    pub autoscale: Option<AutoscaleConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AutoscaleConfig {
    pub interval_ms: u64,
    pub low_water: usize,
    pub high_water: usize,
    pub max_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            size: num_cpus::get(),
            queue_capacity: None,
            result_capacity: None,
            collect_results: true,
            thread_name: "workpool".into(),
            autoscale: None,
        }
    }
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        let cpus = num_cpus::get();
        AutoscaleConfig {
            interval_ms: 500,
            low_water: cpus,
            high_water: cpus * 4,
            max_size: cpus * 8,
        }
    }
}

impl PoolConfig {
    pub fn new(size: usize) -> Self {
        PoolConfig {
            size,
            ..Default::default()
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: PoolConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by any `WORKPOOL_*` variable that is set.
    pub fn from_env() -> Result<Self> {
        let mut config = PoolConfig::default();
        if let Some(size) = env_var(ENV_SIZE)? {
            config.size = size;
        }
        config.queue_capacity = env_var(ENV_QUEUE_CAPACITY)?;
        config.result_capacity = env_var(ENV_RESULT_CAPACITY)?;
        if let Ok(name) = env::var(ENV_THREAD_NAME) {
            config.thread_name = name;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(PoolError::InvalidSize(self.size));
        }
        if self.queue_capacity == Some(0) {
            return Err(PoolError::InvalidConfig(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.result_capacity == Some(0) {
            return Err(PoolError::InvalidConfig(
                "result_capacity must be at least 1".into(),
            ));
        }
        if let Some(autoscale) = &self.autoscale {
            autoscale.validate()?;
        }
        Ok(())
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.size)
    }

    pub fn result_capacity(&self) -> usize {
        self.result_capacity.unwrap_or(self.size)
    }
}

impl AutoscaleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(PoolError::InvalidConfig(
                "autoscale interval_ms must be positive".into(),
            ));
        }
        if self.low_water == 0 || self.low_water > self.high_water {
            return Err(PoolError::InvalidConfig(format!(
                "autoscale needs 0 < low_water <= high_water, got {} and {}",
                self.low_water, self.high_water
            )));
        }
        if self.max_size < self.high_water {
            return Err(PoolError::InvalidConfig(format!(
                "autoscale max_size {} is below high_water {}",
                self.max_size, self.high_water
            )));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn policy(&self) -> ResizePolicy {
        ResizePolicy {
            low_water: self.low_water,
            high_water: self.high_water,
            max_capacity: self.max_size,
        }
    }
}

fn env_var<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| PoolError::InvalidConfig(format!("{} has invalid value {:?}", key, raw))),
        Err(_) => Ok(None),
    }
}
