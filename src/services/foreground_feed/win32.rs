use crate::error::{Result, SyncError};
use crate::events::{EngineCommand, ForegroundEvent};
use once_cell::sync::OnceCell;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tokio::time::{interval, Duration};
use tracing::{debug, info};
use windows::core::PWSTR;
use windows::Win32::Foundation::{CloseHandle, FALSE, HMODULE, HWND};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::Accessibility::{SetWinEventHook, UnhookWinEvent, HWINEVENTHOOK};
use windows::Win32::UI::WindowsAndMessaging::{
    DispatchMessageW, GetForegroundWindow, GetMessageW, GetWindowThreadProcessId, TranslateMessage,
    EVENT_SYSTEM_FOREGROUND, MSG, WINEVENT_OUTOFCONTEXT,
};

use super::r#trait::ForegroundFeed;

// Колбэк хука не принимает контекст, поэтому очередь движка хранится глобально
static EVENT_SINK: OnceCell<UnboundedSender<EngineCommand>> = OnceCell::new();

/// Уведомления `EVENT_SYSTEM_FOREGROUND` через `SetWinEventHook`.
///
/// Хук out-of-context: колбэк вызывается в потоке, который крутит цикл
/// сообщений, поэтому для него выделяется отдельный поток.
pub struct WinEventHookFeed {
    events: UnboundedSender<EngineCommand>,
}

impl WinEventHookFeed {
    pub fn new(events: UnboundedSender<EngineCommand>) -> Self {
        Self { events }
    }

    async fn run_impl(self) -> Result<()> {
        EVENT_SINK
            .set(self.events)
            .map_err(|_| SyncError::Internal("хук смены активного окна уже установлен".to_string()))?;

        let (done_tx, done_rx) = oneshot::channel();
        std::thread::Builder::new()
            .name("foreground-hook".to_string())
            .spawn(move || {
                let _ = done_tx.send(run_message_loop());
            })?;

        done_rx
            .await
            .map_err(|_| SyncError::Internal("поток хука завершился аварийно".to_string()))?
    }
}

#[async_trait::async_trait]
impl ForegroundFeed for WinEventHookFeed {
    async fn run(self: Box<Self>) -> Result<()> {
        (*self).run_impl().await
    }
}

/// Guard that removes the hook when dropped.
struct HookGuard(HWINEVENTHOOK);

impl Drop for HookGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = UnhookWinEvent(self.0);
        }
        info!("Хук смены активного окна снят");
    }
}

fn run_message_loop() -> Result<()> {
    let hook = unsafe {
        SetWinEventHook(
            EVENT_SYSTEM_FOREGROUND,
            EVENT_SYSTEM_FOREGROUND,
            HMODULE::default(),
            Some(foreground_proc),
            0,
            0,
            WINEVENT_OUTOFCONTEXT,
        )
    };
    if hook.0 == 0 {
        return Err(SyncError::Platform("SetWinEventHook вернул пустой хук".to_string()));
    }
    let _guard = HookGuard(hook);
    info!("Хук смены активного окна установлен");

    let mut msg = MSG::default();
    while unsafe { GetMessageW(&mut msg, HWND::default(), 0, 0) }.as_bool() {
        unsafe {
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }

    Ok(())
}

unsafe extern "system" fn foreground_proc(
    _hook: HWINEVENTHOOK,
    _event: u32,
    hwnd: HWND,
    _id_object: i32,
    _id_child: i32,
    _event_thread: u32,
    _event_time: u32,
) {
    let Some(sink) = EVENT_SINK.get() else {
        return;
    };

    // Поток диспетчеризации ОС: только разрешение имени и постановка в очередь
    if let Some(event) = resolve_window(hwnd) {
        let _ = sink.send(event.into());
    }
}

/// Опрос `GetForegroundWindow` с заданным интервалом
pub struct ForegroundPollingFeed {
    period: Duration,
    events: UnboundedSender<EngineCommand>,
    current: Option<(Option<u32>, String)>,
}

impl ForegroundPollingFeed {
    pub fn new(period: Duration, events: UnboundedSender<EngineCommand>) -> Self {
        Self {
            period,
            events,
            current: None,
        }
    }

    async fn run_impl(mut self) -> Result<()> {
        info!("Запуск polling отслеживания активного приложения ({:?})", self.period);

        let mut ticker = interval(self.period);
        loop {
            ticker.tick().await;

            let hwnd = unsafe { GetForegroundWindow() };
            let Some(event) = resolve_window(hwnd) else {
                continue;
            };

            if !self.is_changed(&event) {
                continue;
            }

            self.current = Some((event.pid, event.executable.clone()));
            if self.events.send(event.into()).is_err() {
                info!("Очередь событий закрыта, polling остановлен");
                return Ok(());
            }
        }
    }

    fn is_changed(&self, event: &ForegroundEvent) -> bool {
        match &self.current {
            Some((pid, executable)) => *pid != event.pid || *executable != event.executable,
            None => true,
        }
    }
}

#[async_trait::async_trait]
impl ForegroundFeed for ForegroundPollingFeed {
    async fn run(self: Box<Self>) -> Result<()> {
        (*self).run_impl().await
    }
}

/// Окно -> процесс -> имя исполняемого файла. `None`, если процесс уже
/// завершился или недоступен.
fn resolve_window(hwnd: HWND) -> Option<ForegroundEvent> {
    if hwnd.0 == 0 {
        return None;
    }

    let mut pid = 0u32;
    unsafe { GetWindowThreadProcessId(hwnd, Some(&mut pid as *mut u32)) };
    if pid == 0 {
        return None;
    }

    match process_image_name(pid) {
        Some(executable) => Some(ForegroundEvent::new(executable).with_pid(pid)),
        None => {
            debug!("Не удалось определить исполняемый файл процесса {}", pid);
            None
        }
    }
}

fn process_image_name(pid: u32) -> Option<String> {
    let handle = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, pid) }.ok()?;

    let mut buf = [0u16; 260];
    let mut len = buf.len() as u32;
    let queried = unsafe {
        QueryFullProcessImageNameW(handle, PROCESS_NAME_WIN32, PWSTR(buf.as_mut_ptr()), &mut len)
    };
    unsafe {
        let _ = CloseHandle(handle);
    }
    queried.ok()?;

    let path = String::from_utf16_lossy(&buf[..len as usize]);
    path.rsplit('\\').next().map(str::to_string).filter(|name| !name.is_empty())
}
