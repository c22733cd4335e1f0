use crate::events::LayoutId;
use crate::services::keyboard_layout::LayoutProbe;
use tracing::{info, warn};

/// Базовая раскладка: цель для приложений без ассоциации.
///
/// Инициализируется один раз при старте из `LayoutProbe` и после каждого
/// переключения движка перезаписывается раскладкой, реально прочитанной после
/// переключения (а не запрошенной целью). Если при старте зонд недоступен,
/// базовой становится первая успешно прочитанная раскладка.
#[derive(Debug, Clone, Default)]
pub struct BaselineTracker {
    layout: Option<LayoutId>,
}

impl BaselineTracker {
    pub fn new(layout: LayoutId) -> Self {
        Self { layout: Some(layout) }
    }

    pub fn from_probe(probe: &dyn LayoutProbe) -> Self {
        match probe.current_layout() {
            Ok(layout) => {
                info!("Базовая раскладка при запуске: {}", layout);
                Self::new(layout)
            }
            Err(e) => {
                warn!("Не удалось прочитать раскладку при запуске: {}", e);
                Self::default()
            }
        }
    }

    pub fn current(&self) -> Option<&LayoutId> {
        self.layout.as_ref()
    }

    /// Возвращает `true`, если базовая раскладка изменилась
    pub fn rebase(&mut self, observed: LayoutId) -> bool {
        if self.layout.as_ref() == Some(&observed) {
            return false;
        }
        match &self.layout {
            Some(previous) => info!("Базовая раскладка: {} -> {}", previous, observed),
            None => info!("Базовая раскладка: {}", observed),
        }
        self.layout = Some(observed);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SyncError};

    struct FixedProbe(Option<&'static str>);

    impl LayoutProbe for FixedProbe {
        fn current_layout(&self) -> Result<LayoutId> {
            match self.0 {
                Some(id) => LayoutId::new(id),
                None => Err(SyncError::Platform("нет активного окна".to_string())),
            }
        }
    }

    fn layout(id: &str) -> LayoutId {
        LayoutId::new(id).unwrap()
    }

    #[test]
    fn test_initialized_from_probe() {
        let tracker = BaselineTracker::from_probe(&FixedProbe(Some("0000040C")));
        assert_eq!(tracker.current(), Some(&layout("0000040C")));
    }

    #[test]
    fn test_unknown_when_probe_fails() {
        let mut tracker = BaselineTracker::from_probe(&FixedProbe(None));
        assert_eq!(tracker.current(), None);

        assert!(tracker.rebase(layout("00000409")));
        assert_eq!(tracker.current(), Some(&layout("00000409")));
    }

    #[test]
    fn test_rebase_tracks_observed_layout() {
        let mut tracker = BaselineTracker::new(layout("0000040C"));

        assert!(!tracker.rebase(layout("0000040c")));
        assert!(tracker.rebase(layout("00000409")));
        assert_eq!(tracker.current(), Some(&layout("00000409")));
    }
}
