use super::{ForegroundEvent, LayoutId, SwitchStrategy, SyncStatus};
use tokio::sync::oneshot;

/// Сообщение в очередь движка. События окна и ручные запросы идут через одну
/// очередь и обрабатываются строго по порядку поступления.
#[derive(Debug)]
pub enum EngineCommand {
    Foreground(ForegroundEvent),
    /// Ручное переключение; итоговый статус уходит в `reply`, если канал задан
    Switch {
        target: LayoutId,
        strategy: SwitchStrategy,
        reply: Option<oneshot::Sender<SyncStatus>>,
    },
}

impl EngineCommand {
    pub fn switch(target: LayoutId, strategy: SwitchStrategy) -> (Self, oneshot::Receiver<SyncStatus>) {
        let (reply, receiver) = oneshot::channel();
        let command = Self::Switch {
            target,
            strategy,
            reply: Some(reply),
        };
        (command, receiver)
    }
}

impl From<ForegroundEvent> for EngineCommand {
    fn from(event: ForegroundEvent) -> Self {
        Self::Foreground(event)
    }
}
