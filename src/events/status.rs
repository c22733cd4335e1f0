use super::{LayoutId, SwitchStrategy};
use std::fmt;

/// Откуда взята целевая раскладка
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSource {
    Association,
    Baseline,
    Manual,
}

impl fmt::Display for TargetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSource::Association => f.write_str("ассоциация"),
            TargetSource::Baseline => f.write_str("базовая"),
            TargetSource::Manual => f.write_str("вручную"),
        }
    }
}

/// Результат одного решения движка синхронизации.
///
/// Каждое событие (и каждое ручное переключение) порождает ровно один статус;
/// он же пишется в лог и используется в тестах.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Повтор события для того же приложения, ничего не делалось
    Duplicate { executable: String },

    /// Текущая раскладка уже совпадает с целевой
    AlreadyCorrect {
        executable: Option<String>,
        target: LayoutId,
        source: TargetSource,
    },

    /// Выполнено переключение; `after` - раскладка, прочитанная после него
    Switched {
        executable: Option<String>,
        target: LayoutId,
        source: TargetSource,
        strategy: SwitchStrategy,
        before: LayoutId,
        after: Option<LayoutId>,
        /// Ошибка актуатора, если он отказал
        error: Option<String>,
    },

    /// Не удалось прочитать текущую раскладку, решение не принято
    ProbeUnavailable {
        executable: Option<String>,
        reason: String,
    },
}

impl SyncStatus {
    pub fn executable(&self) -> Option<&str> {
        match self {
            SyncStatus::Duplicate { executable } => Some(executable),
            SyncStatus::AlreadyCorrect { executable, .. }
            | SyncStatus::Switched { executable, .. }
            | SyncStatus::ProbeUnavailable { executable, .. } => executable.as_deref(),
        }
    }

    pub fn target(&self) -> Option<&LayoutId> {
        match self {
            SyncStatus::AlreadyCorrect { target, .. } | SyncStatus::Switched { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn is_switch(&self) -> bool {
        matches!(self, SyncStatus::Switched { .. })
    }

    /// Переключение попало точно в цель
    pub fn landed(&self) -> bool {
        match self {
            SyncStatus::Switched { target, after, .. } => after.as_ref() == Some(target),
            SyncStatus::AlreadyCorrect { .. } => true,
            _ => false,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Duplicate { executable } => {
                write!(f, "{}: повторное событие, пропущено", executable)
            }
            SyncStatus::AlreadyCorrect { executable, target, source } => write!(
                f,
                "{}: раскладка уже верная ({}, {})",
                executable.as_deref().unwrap_or("<manual>"),
                target,
                source
            ),
            SyncStatus::Switched { executable, target, source, strategy, before, after, error } => {
                let after = after
                    .as_ref()
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| "?".to_string());
                write!(
                    f,
                    "{}: {} -> {} (цель {}, {}, {})",
                    executable.as_deref().unwrap_or("<manual>"),
                    before,
                    after,
                    target,
                    source,
                    strategy
                )?;
                if let Some(error) = error {
                    write!(f, ", ошибка: {}", error)?;
                }
                Ok(())
            }
            SyncStatus::ProbeUnavailable { executable, reason } => write!(
                f,
                "{}: текущая раскладка недоступна: {}",
                executable.as_deref().unwrap_or("<manual>"),
                reason
            ),
        }
    }
}
