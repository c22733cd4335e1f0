use crate::error::{Result, SyncError};
use crate::events::{EngineCommand, ForegroundEvent};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{interval, Duration};
use tracing::info;

use super::r#trait::ForegroundFeed;

pub struct DryRunFeed {
    applications: Vec<String>,
    period: Duration,
    events: UnboundedSender<EngineCommand>,
}

impl DryRunFeed {
    pub fn new(
        applications: Vec<String>,
        period: Duration,
        events: UnboundedSender<EngineCommand>,
    ) -> Result<Self> {
        if applications.is_empty() {
            return Err(SyncError::Internal(
                "dry_run.applications не содержит ни одного приложения".to_string(),
            ));
        }

        Ok(Self {
            applications,
            period,
            events,
        })
    }

    async fn run_impl(self) -> Result<()> {
        info!("Dry-run режим - ForegroundFeed работает в режиме эмуляции");

        let mut ticker = interval(self.period);
        for executable in self.applications.iter().cycle() {
            ticker.tick().await;

            info!("Dry-run: эмулируем переход на приложение: {}", executable);
            if self.events.send(ForegroundEvent::new(executable.as_str()).into()).is_err() {
                info!("Очередь событий закрыта, эмуляция остановлена");
                break;
            }
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl ForegroundFeed for DryRunFeed {
    async fn run(self: Box<Self>) -> Result<()> {
        (*self).run_impl().await
    }
}
