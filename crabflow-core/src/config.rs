use std::time::Duration;

/// Settings for [`LocalExecutor`](crate::runtime::LocalExecutor).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Task threads are named `{prefix}-{vertex}`.
    pub thread_name_prefix: String,
    /// Upper bound on a task's broker wait. `None` waits until a value is
    /// handed in or the job is cancelled.
    pub broker_wait: Option<Duration>,
    /// Input channels silent for this long stop holding back the watermark.
    pub watermark_idle_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "crabflow-task".to_string(),
            broker_wait: None,
            watermark_idle_timeout: None,
        }
    }
}

impl ExecutorConfig {
    pub fn with_broker_wait(mut self, timeout: Duration) -> Self {
        self.broker_wait = Some(timeout);
        self
    }

    pub fn with_watermark_idle_timeout(mut self, timeout: Duration) -> Self {
        self.watermark_idle_timeout = Some(timeout);
        self
    }
}
