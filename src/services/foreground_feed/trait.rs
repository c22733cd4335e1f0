use crate::config::Config;
use crate::error::Result;
use crate::events::EngineCommand;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Trait for foreground feeds that can run in different modes
#[async_trait::async_trait]
pub trait ForegroundFeed {
    /// Run the feed until the engine queue is closed or the platform source fails
    async fn run(self: Box<Self>) -> Result<()>;
}

/// Factory function to create an appropriate foreground feed based on the dry_run flag
pub fn create_foreground_feed(
    config: Arc<Config>,
    events: UnboundedSender<EngineCommand>,
    dry_run: bool,
) -> Result<Box<dyn ForegroundFeed + Send>> {
    if dry_run {
        return Ok(Box::new(super::dry_run::DryRunFeed::new(
            config.dry_run.applications.clone(),
            Duration::from_millis(config.dry_run.interval_ms),
            events,
        )?));
    }

    #[cfg(windows)]
    {
        match config.feed.mode.as_str() {
            "polling" => Ok(Box::new(super::win32::ForegroundPollingFeed::new(
                Duration::from_millis(config.feed.polling_interval_ms),
                events,
            ))),
            _ => Ok(Box::new(super::win32::WinEventHookFeed::new(events))),
        }
    }

    #[cfg(not(windows))]
    {
        Err(crate::error::SyncError::ServiceUnavailable(
            "отслеживание активного приложения поддерживается только в Windows, используйте --dry-run"
                .to_string(),
        ))
    }
}
