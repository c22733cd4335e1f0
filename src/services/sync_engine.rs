//! Sync engine: the only place that decides whether the keyboard layout must change.
//!
//! One decision per foreground event, made synchronously:
//! debounce -> resolve target -> probe -> compare -> switch -> re-probe and rebase.
//! Every switch, automatic or manual, goes through the same rebase step so the
//! baseline always reflects what the system actually ended up with.

use crate::debug_if_enabled;
use crate::events::{EngineCommand, ForegroundEvent, LayoutId, SwitchStrategy, SyncStatus, TargetSource};
use crate::services::association_table::{normalize_executable_key, AssociationTable};
use crate::services::baseline::BaselineTracker;
use crate::services::keyboard_layout::{KeyboardBackend, LayoutActuator, LayoutProbe};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

/// Состояние синхронизатора; изменяется только движком
#[derive(Debug, Default)]
pub struct SynchronizerState {
    last_seen_app: Option<String>,
    baseline: BaselineTracker,
}

pub struct SyncEngine {
    table: Arc<AssociationTable>,
    probe: Arc<dyn LayoutProbe>,
    actuator: Arc<dyn LayoutActuator>,
    strategy: SwitchStrategy,
    state: SynchronizerState,
}

impl SyncEngine {
    /// Создаёт движок; базовая раскладка читается из зонда
    pub fn new(table: Arc<AssociationTable>, backend: KeyboardBackend, strategy: SwitchStrategy) -> Self {
        let baseline = BaselineTracker::from_probe(backend.probe.as_ref());
        Self::with_baseline(table, backend, strategy, baseline)
    }

    pub fn with_baseline(
        table: Arc<AssociationTable>,
        backend: KeyboardBackend,
        strategy: SwitchStrategy,
        baseline: BaselineTracker,
    ) -> Self {
        info!("Инициализация SyncEngine (стратегия: {})", strategy);
        Self {
            table,
            probe: backend.probe,
            actuator: backend.actuator,
            strategy,
            state: SynchronizerState {
                last_seen_app: None,
                baseline,
            },
        }
    }

    pub fn baseline(&self) -> Option<&LayoutId> {
        self.state.baseline.current()
    }

    pub fn last_seen_app(&self) -> Option<&str> {
        self.state.last_seen_app.as_deref()
    }

    pub fn handle_event(&mut self, event: &ForegroundEvent) -> Option<SyncStatus> {
        debug_if_enabled!("Событие смены активного приложения: {}", event);
        self.on_foreground_change(&event.executable)
    }

    /// Обрабатывает смену активного приложения. `None` - имя не удалось
    /// нормализовать, событие отброшено.
    pub fn on_foreground_change(&mut self, executable: &str) -> Option<SyncStatus> {
        let Some(key) = normalize_executable_key(executable) else {
            debug!("Пустое имя приложения, событие отброшено");
            return None;
        };

        if self.state.last_seen_app.as_deref() == Some(key.as_str()) {
            return Some(report(SyncStatus::Duplicate { executable: key }));
        }
        self.state.last_seen_app = Some(key.clone());

        let resolved = match self.table.get(&key) {
            Some(layout) => Some((layout, TargetSource::Association)),
            None => self
                .state
                .baseline
                .current()
                .cloned()
                .map(|layout| (layout, TargetSource::Baseline)),
        };

        let current = match self.probe.current_layout() {
            Ok(layout) => layout,
            Err(e) => {
                return Some(report(SyncStatus::ProbeUnavailable {
                    executable: Some(key),
                    reason: e.to_string(),
                }))
            }
        };

        let (target, source) = match resolved {
            Some(resolved) => resolved,
            None => {
                // Базовая раскладка ещё неизвестна: принимаем текущую
                self.state.baseline.rebase(current.clone());
                (current.clone(), TargetSource::Baseline)
            }
        };

        Some(self.converge(Some(key), target, source, current, self.strategy))
    }

    /// Ручное переключение (например, проверка раскладки из CLI). Проходит через
    /// тот же шаг перебазирования, `last_seen_app` не меняет.
    pub fn request_switch(&mut self, target: LayoutId, strategy: SwitchStrategy) -> SyncStatus {
        let current = match self.probe.current_layout() {
            Ok(layout) => layout,
            Err(e) => {
                return report(SyncStatus::ProbeUnavailable {
                    executable: None,
                    reason: e.to_string(),
                })
            }
        };

        self.converge(None, target, TargetSource::Manual, current, strategy)
    }

    pub fn handle_command(&mut self, command: EngineCommand) -> Option<SyncStatus> {
        match command {
            EngineCommand::Foreground(event) => self.handle_event(&event),
            EngineCommand::Switch {
                target,
                strategy,
                reply,
            } => {
                let status = self.request_switch(target, strategy);
                if let Some(reply) = reply {
                    if reply.send(status.clone()).is_err() {
                        debug!("Инициатор ручного переключения не дождался ответа");
                    }
                }
                Some(status)
            }
        }
    }

    /// Обрабатывает команды по одной в порядке поступления, пока канал открыт.
    /// Блокирует поток; запускать в выделенном потоке.
    pub fn run_blocking(mut self, mut commands: UnboundedReceiver<EngineCommand>) {
        info!("SyncEngine запущен");
        while let Some(command) = commands.blocking_recv() {
            self.handle_command(command);
        }
        info!("Канал событий закрыт, SyncEngine остановлен");
    }

    fn converge(
        &mut self,
        executable: Option<String>,
        target: LayoutId,
        source: TargetSource,
        before: LayoutId,
        strategy: SwitchStrategy,
    ) -> SyncStatus {
        if before == target {
            return report(SyncStatus::AlreadyCorrect {
                executable,
                target,
                source,
            });
        }

        let error = match self.actuator.switch(strategy, &target) {
            Ok(()) => None,
            Err(e) => {
                warn!("Не удалось переключить раскладку на {}: {}", target, e);
                Some(e.to_string())
            }
        };

        let after = match self.probe.current_layout() {
            Ok(observed) => {
                // При отказе актуатора базовая раскладка не трогается
                if error.is_none() {
                    self.state.baseline.rebase(observed.clone());
                }
                Some(observed)
            }
            Err(e) => {
                warn!("Не удалось прочитать раскладку после переключения: {}", e);
                None
            }
        };

        report(SyncStatus::Switched {
            executable,
            target,
            source,
            strategy,
            before,
            after,
            error,
        })
    }
}

fn report(status: SyncStatus) -> SyncStatus {
    match &status {
        SyncStatus::Duplicate { .. } => debug_if_enabled!("{}", status),
        SyncStatus::Switched { .. } if !status.landed() => warn!("{}", status),
        _ => info!("{}", status),
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SyncError};
    use parking_lot::Mutex;

    /// Клавиатура-двойник: ротация раскладок и журнал вызовов актуатора
    struct RecordingKeyboard {
        layouts: Vec<LayoutId>,
        current: Mutex<usize>,
        calls: Mutex<Vec<String>>,
        // Актуатор "соглашается", но раскладка не меняется
        stuck: bool,
        probe_fails: Mutex<bool>,
        // Зонд отказывает сразу после успешного переключения
        layout_read_fails_after_switch: Mutex<bool>,
    }

    impl RecordingKeyboard {
        fn new(ids: &[&str]) -> Arc<Self> {
            Self::build(ids, false)
        }

        fn stuck(ids: &[&str]) -> Arc<Self> {
            Self::build(ids, true)
        }

        fn build(ids: &[&str], stuck: bool) -> Arc<Self> {
            Arc::new(Self {
                layouts: ids.iter().map(|id| layout(id)).collect(),
                current: Mutex::new(0),
                calls: Mutex::new(Vec::new()),
                stuck,
                probe_fails: Mutex::new(false),
                layout_read_fails_after_switch: Mutex::new(false),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn after_switch(&self) {
            if *self.layout_read_fails_after_switch.lock() {
                *self.probe_fails.lock() = true;
            }
        }

        fn set_current(&self, id: &str) {
            let index = self.layouts.iter().position(|l| l == &layout(id)).unwrap();
            *self.current.lock() = index;
        }
    }

    impl LayoutProbe for RecordingKeyboard {
        fn current_layout(&self) -> Result<LayoutId> {
            if *self.probe_fails.lock() {
                return Err(SyncError::Platform("нет активного окна".to_string()));
            }
            Ok(self.layouts[*self.current.lock()].clone())
        }
    }

    impl LayoutActuator for RecordingKeyboard {
        fn activate(&self, target: &LayoutId) -> Result<()> {
            self.calls.lock().push(format!("activate {}", target));
            let index = self
                .layouts
                .iter()
                .position(|l| l == target)
                .ok_or_else(|| SyncError::InvalidLayout(target.to_string()))?;
            if !self.stuck {
                *self.current.lock() = index;
            }
            self.after_switch();
            Ok(())
        }

        fn toggle(&self) -> Result<()> {
            self.calls.lock().push("toggle".to_string());
            if !self.stuck {
                let mut current = self.current.lock();
                *current = (*current + 1) % self.layouts.len();
            }
            self.after_switch();
            Ok(())
        }
    }

    fn layout(id: &str) -> LayoutId {
        LayoutId::new(id).unwrap()
    }

    fn table_with(entries: &[(&str, &str)]) -> Arc<AssociationTable> {
        let table = AssociationTable::new("associations.json");
        for (exe, id) in entries {
            table.put(exe, layout(id)).unwrap();
        }
        Arc::new(table)
    }

    fn engine(
        table: Arc<AssociationTable>,
        keyboard: &Arc<RecordingKeyboard>,
        strategy: SwitchStrategy,
    ) -> SyncEngine {
        let backend = KeyboardBackend {
            probe: keyboard.clone(),
            actuator: keyboard.clone(),
        };
        SyncEngine::new(table, backend, strategy)
    }

    #[test]
    fn test_associated_app_switches_once() {
        let keyboard = RecordingKeyboard::new(&["0000040C", "00000409"]);
        let mut engine = engine(table_with(&[("code.exe", "00000409")]), &keyboard, SwitchStrategy::Direct);
        assert_eq!(engine.baseline(), Some(&layout("0000040C")));

        let status = engine.on_foreground_change("code.exe").unwrap();

        assert_eq!(keyboard.calls(), vec!["activate 00000409"]);
        match status {
            SyncStatus::Switched { executable, target, source, before, after, error, .. } => {
                assert_eq!(executable.as_deref(), normalize_executable_key("code.exe").as_deref());
                assert_eq!(target, layout("00000409"));
                assert_eq!(source, TargetSource::Association);
                assert_eq!(before, layout("0000040C"));
                assert_eq!(after, Some(layout("00000409")));
                assert_eq!(error, None);
            }
            other => panic!("ожидалось переключение, получено {:?}", other),
        }
        assert_eq!(engine.baseline(), Some(&layout("00000409")));
    }

    #[test]
    fn test_unassociated_app_on_baseline_is_noop() {
        let keyboard = RecordingKeyboard::new(&["0000040C", "00000409"]);
        let mut engine = engine(table_with(&[("code.exe", "00000409")]), &keyboard, SwitchStrategy::Direct);

        let status = engine.on_foreground_change("explorer.exe").unwrap();

        assert!(keyboard.calls().is_empty());
        assert_eq!(
            status,
            SyncStatus::AlreadyCorrect {
                executable: normalize_executable_key("explorer.exe"),
                target: layout("0000040C"),
                source: TargetSource::Baseline,
            }
        );
    }

    #[test]
    fn test_duplicate_events_switch_only_once() {
        let keyboard = RecordingKeyboard::new(&["0000040C", "00000409"]);
        let mut engine = engine(table_with(&[("code.exe", "00000409")]), &keyboard, SwitchStrategy::Direct);

        engine.on_foreground_change("code.exe").unwrap();
        // Пользователь вручную вернул раскладку, ОС повторила уведомление
        keyboard.set_current("0000040C");
        let baseline = engine.baseline().cloned();
        let second = engine.on_foreground_change("code.exe").unwrap();

        assert_eq!(keyboard.calls().len(), 1);
        assert!(matches!(second, SyncStatus::Duplicate { .. }));
        assert_eq!(engine.baseline().cloned(), baseline);
    }

    #[test]
    fn test_association_lookup_ignores_case() {
        let keyboard = RecordingKeyboard::new(&["0000040C", "00000409"]);
        let mut engine = engine(table_with(&[("notepad.exe", "00000409")]), &keyboard, SwitchStrategy::Direct);

        let status = engine.on_foreground_change("NOTEPAD.EXE").unwrap();

        assert_eq!(status.target(), Some(&layout("00000409")));
        assert_eq!(keyboard.calls(), vec!["activate 00000409"]);
    }

    #[test]
    fn test_fallback_target_is_current_baseline() {
        let keyboard = RecordingKeyboard::new(&["0000040C", "00000409"]);
        let mut engine = engine(table_with(&[("code.exe", "00000409")]), &keyboard, SwitchStrategy::Direct);

        engine.on_foreground_change("code.exe").unwrap();
        let status = engine.on_foreground_change("explorer.exe").unwrap();

        // База переехала на 00000409 вместе с переключением: не откатываемся назад
        assert_eq!(status.target(), Some(&layout("00000409")));
        assert!(!status.is_switch());
        assert_eq!(keyboard.calls().len(), 1);
    }

    #[test]
    fn test_unassociated_app_restores_baseline() {
        let keyboard = RecordingKeyboard::new(&["0000040C", "00000409"]);
        let mut engine = engine(table_with(&[]), &keyboard, SwitchStrategy::Direct);

        // Раскладку сменили вне движка
        keyboard.set_current("00000409");
        let status = engine.on_foreground_change("explorer.exe").unwrap();

        assert_eq!(keyboard.calls(), vec!["activate 0000040C"]);
        assert!(status.landed());
        assert_eq!(status.target(), Some(&layout("0000040C")));
    }

    #[test]
    fn test_toggle_rebases_on_observed_layout() {
        // Три раскладки: слепой аккорд промахивается мимо цели
        let keyboard = RecordingKeyboard::new(&["0000040C", "00000409", "00000419"]);
        let mut engine = engine(table_with(&[("telegram.exe", "00000419")]), &keyboard, SwitchStrategy::Toggle);

        let status = engine.on_foreground_change("telegram.exe").unwrap();
        assert!(status.is_switch());
        assert!(!status.landed());
        assert_eq!(engine.baseline(), Some(&layout("00000409")));

        // Следующее приложение без ассоциации сравнивается с реальностью, а не с намерением
        let status = engine.on_foreground_change("explorer.exe").unwrap();
        assert!(!status.is_switch());
        assert_eq!(keyboard.calls(), vec!["toggle"]);
    }

    #[test]
    fn test_stuck_actuator_does_not_loop() {
        let keyboard = RecordingKeyboard::stuck(&["0000040C", "00000409"]);
        let mut engine = engine(table_with(&[("code.exe", "00000409")]), &keyboard, SwitchStrategy::Direct);

        let status = engine.on_foreground_change("code.exe").unwrap();
        match &status {
            SyncStatus::Switched { before, after, .. } => {
                assert_eq!(before, &layout("0000040C"));
                assert_eq!(after.as_ref(), Some(&layout("0000040C")));
            }
            other => panic!("ожидалось переключение, получено {:?}", other),
        }
        assert_eq!(engine.baseline(), Some(&layout("0000040C")));

        engine.on_foreground_change("explorer.exe").unwrap();
        assert_eq!(keyboard.calls().len(), 1);

        // Повторная попытка только при следующем отличающемся событии
        engine.on_foreground_change("code.exe").unwrap();
        assert_eq!(keyboard.calls().len(), 2);
    }

    #[test]
    fn test_malformed_association_is_retried_without_rebase() {
        let keyboard = RecordingKeyboard::new(&["0000040C", "00000409"]);
        let mut engine = engine(table_with(&[("game.exe", "qwerty")]), &keyboard, SwitchStrategy::Direct);

        let status = engine.on_foreground_change("game.exe").unwrap();
        match &status {
            SyncStatus::Switched { error, after, .. } => {
                assert!(error.is_some());
                assert_eq!(after.as_ref(), Some(&layout("0000040C")));
            }
            other => panic!("ожидалось переключение, получено {:?}", other),
        }
        assert_eq!(engine.baseline(), Some(&layout("0000040C")));

        engine.on_foreground_change("explorer.exe").unwrap();
        engine.on_foreground_change("game.exe").unwrap();
        assert_eq!(keyboard.calls(), vec!["activate qwerty", "activate qwerty"]);
    }

    #[test]
    fn test_probe_failure_makes_no_switch() {
        let keyboard = RecordingKeyboard::new(&["0000040C", "00000409"]);
        let mut engine = engine(table_with(&[("code.exe", "00000409")]), &keyboard, SwitchStrategy::Direct);

        *keyboard.probe_fails.lock() = true;
        let status = engine.on_foreground_change("code.exe").unwrap();

        assert!(matches!(status, SyncStatus::ProbeUnavailable { .. }));
        assert!(keyboard.calls().is_empty());
        assert_eq!(engine.baseline(), Some(&layout("0000040C")));
    }

    #[test]
    fn test_failed_read_after_switch_keeps_baseline() {
        let keyboard = RecordingKeyboard::new(&["0000040C", "00000409"]);
        let mut engine = engine(table_with(&[("code.exe", "00000409")]), &keyboard, SwitchStrategy::Direct);

        *keyboard.layout_read_fails_after_switch.lock() = true;
        let status = engine.on_foreground_change("code.exe").unwrap();

        match &status {
            SyncStatus::Switched { before, after, error, .. } => {
                assert_eq!(before, &layout("0000040C"));
                assert_eq!(after, &None);
                assert_eq!(error, &None);
            }
            other => panic!("ожидалось переключение, получено {:?}", other),
        }
        assert!(!status.landed());
        assert_eq!(keyboard.calls(), vec!["activate 00000409"]);
        assert_eq!(engine.baseline(), Some(&layout("0000040C")));
    }

    #[test]
    fn test_unknown_baseline_adopts_first_probe() {
        let keyboard = RecordingKeyboard::new(&["0000040C", "00000409"]);
        *keyboard.probe_fails.lock() = true;
        let mut engine = engine(table_with(&[]), &keyboard, SwitchStrategy::Direct);
        assert_eq!(engine.baseline(), None);

        *keyboard.probe_fails.lock() = false;
        keyboard.set_current("00000409");
        let status = engine.on_foreground_change("explorer.exe").unwrap();

        assert!(!status.is_switch());
        assert_eq!(engine.baseline(), Some(&layout("00000409")));
        assert!(keyboard.calls().is_empty());
    }

    #[test]
    fn test_manual_switch_rebases_but_keeps_last_seen_app() {
        let keyboard = RecordingKeyboard::new(&["0000040C", "00000409"]);
        let mut engine = engine(table_with(&[]), &keyboard, SwitchStrategy::Toggle);

        engine.on_foreground_change("explorer.exe").unwrap();
        let status = engine.request_switch(layout("00000409"), SwitchStrategy::Direct);

        assert!(status.landed());
        assert_eq!(status.executable(), None);
        assert_eq!(engine.baseline(), Some(&layout("00000409")));
        assert_eq!(engine.last_seen_app(), normalize_executable_key("explorer.exe").as_deref());
        assert_eq!(keyboard.calls(), vec!["activate 00000409"]);
    }

    #[test]
    fn test_empty_executable_is_dropped() {
        let keyboard = RecordingKeyboard::new(&["0000040C"]);
        let mut engine = engine(table_with(&[]), &keyboard, SwitchStrategy::Direct);

        assert_eq!(engine.on_foreground_change("  "), None);
        assert_eq!(engine.last_seen_app(), None);
    }

    #[test]
    fn test_run_blocking_processes_events_in_order() {
        let keyboard = RecordingKeyboard::new(&["0000040C", "00000409"]);
        let engine = engine(
            table_with(&[("code.exe", "00000409"), ("word.exe", "0000040C")]),
            &keyboard,
            SwitchStrategy::Direct,
        );

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        for exe in ["code.exe", "code.exe", "word.exe", "explorer.exe"] {
            tx.send(ForegroundEvent::new(exe).into()).unwrap();
        }
        drop(tx);

        engine.run_blocking(rx);

        assert_eq!(keyboard.calls(), vec!["activate 00000409", "activate 0000040C"]);
    }

    #[test]
    fn test_queued_manual_switch_is_not_undone_by_next_event() {
        let keyboard = RecordingKeyboard::new(&["0000040C", "00000409"]);
        let engine = engine(table_with(&[]), &keyboard, SwitchStrategy::Direct);

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(ForegroundEvent::new("explorer.exe").into()).unwrap();
        let (command, mut reply) = EngineCommand::switch(layout("00000409"), SwitchStrategy::Direct);
        tx.send(command).unwrap();
        tx.send(ForegroundEvent::new("notepad.exe").into()).unwrap();
        drop(tx);

        engine.run_blocking(rx);

        let status = reply.try_recv().unwrap();
        assert!(status.landed());
        assert_eq!(status.executable(), None);
        // База переехала вместе с ручным переключением, откатывать нечего
        assert_eq!(keyboard.calls(), vec!["activate 00000409"]);
    }

    #[test]
    fn test_manual_switch_reply_can_be_dropped() {
        let keyboard = RecordingKeyboard::new(&["0000040C", "00000409"]);
        let mut engine = engine(table_with(&[]), &keyboard, SwitchStrategy::Direct);

        let (command, reply) = EngineCommand::switch(layout("00000409"), SwitchStrategy::Direct);
        drop(reply);
        let status = engine.handle_command(command).unwrap();

        assert!(status.landed());
        assert_eq!(engine.baseline(), Some(&layout("00000409")));
    }
}
