//! Worker pool configuration
//!
//! Every job runs inside a dedicated rayon pool so hosts can bound the
//! number of threads a LOD job may occupy.

use lodforge_core::{Error, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

/// Thread pool configuration for LOD jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    /// Number of threads to use (None = one per logical core)
    pub num_threads: Option<usize>,
    /// Thread stack size in bytes
    pub stack_size: Option<usize>,
    /// Thread name prefix
    pub thread_name_prefix: String,
    /// Enable parallel processing (disable to run everything on one worker)
    pub enabled: bool,
    /// Texel rows per bake work item
    pub band_rows: usize,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            stack_size: Some(8 * 1024 * 1024), // 8MB stack
            thread_name_prefix: "lodforge".to_string(),
            enabled: true,
            band_rows: 16,
        }
    }
}

impl ThreadPoolConfig {
    /// Set number of threads
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    /// Set stack size
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Enable or disable parallel processing
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_band_rows(mut self, rows: usize) -> Self {
        self.band_rows = rows;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_threads == Some(0) {
            return Err(Error::InvalidConfig("num_threads must be at least 1".to_string()));
        }
        if self.band_rows == 0 {
            return Err(Error::InvalidConfig("band_rows must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Build a pool matching this configuration
    pub fn build_pool(&self) -> Result<ThreadPool> {
        self.validate()?;
        let mut builder = ThreadPoolBuilder::new();

        if !self.enabled {
            builder = builder.num_threads(1);
        } else if let Some(num_threads) = self.num_threads {
            builder = builder.num_threads(num_threads);
        }

        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }

        if !self.thread_name_prefix.is_empty() {
            let prefix = self.thread_name_prefix.clone();
            builder = builder.thread_name(move |index| format!("{}-{}", prefix, index));
        }

        builder
            .build()
            .map_err(|e| Error::Algorithm(format!("Failed to create thread pool: {}", e)))
    }
}
