//! Configuration for the extraction pipeline.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Keeping every knob in one immutable
//! struct makes it trivial to share across worker tasks and removes any
//! ambient global state: each component receives the value it needs through
//! its constructor or call, never through a singleton.

use crate::error::RxscribeError;
use crate::progress::ProgressCallback;
use crate::prompts::PromptConfig;
use std::fmt;

/// Configuration for single-image and batch extraction.
///
/// # Example
/// ```rust
/// use rxscribe::{ExtractionConfig, PromptConfig};
///
/// let prompts = PromptConfig::new(
///     "You transcribe prescriptions.",
///     "Extract every medication from {filename}.",
/// ).unwrap();
///
/// let config = ExtractionConfig::builder(prompts)
///     .concurrency(8)
///     .max_retries(3)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Resolved prompt pair threaded into every request.
    pub prompts: PromptConfig,

    /// Number of images processed at once in a batch. Default: 5.
    ///
    /// The model call is network-bound; a handful of concurrent requests cuts
    /// batch wall-clock time dramatically. Lower this when the provider rate
    /// limits, raise it when it doesn't.
    pub concurrency: usize,

    /// Extra attempts when the model returns output that does not parse into
    /// the response contract. Default: 2 (three attempts total).
    ///
    /// Only malformed *output* is retried. Transport failures (timeout, auth,
    /// rate limit) surface immediately; retrying them here would mask real
    /// operational problems and hammer a struggling endpoint.
    pub max_retries: u32,

    /// Delay before each malformed-output retry, in milliseconds. Default: 0.
    ///
    /// Malformed output is a model quirk, not an overload signal, so no
    /// backoff is needed by default.
    pub retry_backoff_ms: u64,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Zero keeps the model deterministic and faithful to what is on the
    /// page, which is exactly what transcription wants.
    pub temperature: f32,

    /// Per-model-call timeout in seconds. Default: 60.
    ///
    /// A timeout counts as a transport failure: the attempt is not retried
    /// by the invoker and the item fails with a timeout message.
    pub api_timeout_secs: u64,

    /// Largest accepted source image, in bytes. Default: 10 MiB.
    pub max_image_bytes: u64,

    /// Optional per-item progress events for batch runs.
    pub progress_callback: Option<ProgressCallback>,
}

impl ExtractionConfig {
    /// Create a builder. Prompts are the only mandatory input: the pipeline
    /// refuses to exist without resolved instructions.
    pub fn builder(prompts: PromptConfig) -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: ExtractionConfig {
                prompts,
                concurrency: 5,
                max_retries: 2,
                retry_backoff_ms: 0,
                temperature: 0.0,
                api_timeout_secs: 60,
                max_image_bytes: 10 * 1024 * 1024,
                progress_callback: None,
            },
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("temperature", &self.temperature)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_image_bytes", &self.max_image_bytes)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn callback>"),
            )
            .finish()
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_image_bytes(mut self, bytes: u64) -> Self {
        self.config.max_image_bytes = bytes;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, RxscribeError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(RxscribeError::InvalidConfig(
                "concurrency must be >= 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(RxscribeError::InvalidConfig(
                "api timeout must be >= 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompts() -> PromptConfig {
        PromptConfig::new("system", "user {filename}").unwrap()
    }

    #[test]
    fn defaults() {
        let config = ExtractionConfig::builder(prompts()).build().unwrap();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_backoff_ms, 0);
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.api_timeout_secs, 60);
        assert_eq!(config.max_image_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn concurrency_floors_at_one() {
        let config = ExtractionConfig::builder(prompts())
            .concurrency(0)
            .build()
            .unwrap();
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn temperature_clamps() {
        let config = ExtractionConfig::builder(prompts())
            .temperature(5.0)
            .build()
            .unwrap();
        assert_eq!(config.temperature, 2.0);
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = ExtractionConfig::builder(prompts())
            .api_timeout_secs(0)
            .build();
        assert!(err.is_err());
    }
}
