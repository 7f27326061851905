//! PostboxProcessorBuilder - processor の構築とワイヤリング
//!
//! 必須なのは transactor（ストレージ）と target（配送先）だけ。
//! それ以外は既定値を持ち、`build()` 時に設定を検証する（Fail-fast）。

use std::sync::Arc;
use std::time::Duration;

use super::config::{ConfigError, ProcessingConfig};
use super::processing::{PostboxProcessor, SuccessCriteria, successful_status};
use crate::domain::Response;
use crate::impls::TokioExecutionContext;
use crate::ports::{EventSink, ExecutionContext, NoopEventSink, PostboxTransactor, RequestHandler};

/// Wires a [`PostboxProcessor`].
///
/// # 使用例
/// ```ignore
/// let processor = PostboxProcessor::builder(transactor, target)
///     .batch_size(50)
///     .events(Arc::new(TracingEventSink))
///     .build()?;
/// ```
///
/// Defaults: [`ProcessingConfig::default`], no-op events, a fresh
/// [`TokioExecutionContext`] and 2xx as the success criteria.
pub struct PostboxProcessorBuilder {
    transactor: Arc<dyn PostboxTransactor>,
    target: Arc<dyn RequestHandler>,
    config: ProcessingConfig,
    events: Option<Arc<dyn EventSink>>,
    context: Option<Arc<dyn ExecutionContext>>,
    success_criteria: Option<SuccessCriteria>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid processing config: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl PostboxProcessorBuilder {
    pub fn new(transactor: Arc<dyn PostboxTransactor>, target: Arc<dyn RequestHandler>) -> Self {
        Self {
            transactor,
            target,
            config: ProcessingConfig::default(),
            events: None,
            context: None,
            success_criteria: None,
        }
    }

    /// Replace the whole config (e.g. one loaded with [`ProcessingConfig::from_env`]).
    pub fn config(mut self, config: ProcessingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn max_polling_time(mut self, max_polling_time: Duration) -> Self {
        self.config.max_polling_time = max_polling_time;
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn context(mut self, context: Arc<dyn ExecutionContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn success_criteria<F>(mut self, criteria: F) -> Self
    where
        F: Fn(&Response) -> bool + Send + Sync + 'static,
    {
        self.success_criteria = Some(Arc::new(criteria));
        self
    }

    /// # 検証
    /// - `batch_size` と `max_polling_time` が 0 でないこと
    pub fn build(self) -> Result<PostboxProcessor, BuildError> {
        self.config.validate()?;

        Ok(PostboxProcessor {
            transactor: self.transactor,
            target: self.target,
            config: self.config,
            events: self.events.unwrap_or_else(|| Arc::new(NoopEventSink)),
            context: self
                .context
                .unwrap_or_else(|| Arc::new(TokioExecutionContext::new())),
            success_criteria: self.success_criteria.unwrap_or_else(successful_status),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Request, Status};
    use crate::impls::InMemoryPostbox;

    fn builder() -> PostboxProcessorBuilder {
        let target = |_: &Request| Response::new(Status::OK);
        PostboxProcessor::builder(Arc::new(InMemoryPostbox::new()), Arc::new(target))
    }

    #[test]
    fn test_build_with_defaults() {
        let processor = builder().build().unwrap();
        assert_eq!(processor.config(), &ProcessingConfig::default());
    }

    #[test]
    fn test_build_with_overrides() {
        let processor = builder()
            .batch_size(3)
            .max_polling_time(Duration::from_millis(250))
            .build()
            .unwrap();
        assert_eq!(processor.config().batch_size, 3);
        assert_eq!(processor.config().max_polling_time, Duration::from_millis(250));
    }

    #[test]
    fn test_build_rejects_zero_batch_size() {
        let result = builder().batch_size(0).build();
        assert!(matches!(
            result,
            Err(BuildError::InvalidConfig(ConfigError::ZeroBatchSize))
        ));
    }

    #[test]
    fn test_build_rejects_zero_polling_time() {
        let result = builder().max_polling_time(Duration::ZERO).build();
        assert!(matches!(
            result,
            Err(BuildError::InvalidConfig(ConfigError::ZeroPollingTime))
        ));
    }
}
