use crate::error::{Result, SyncError};
use crate::events::{LayoutId, Modifier, ToggleChord};
use crate::sync_error;
use std::mem::size_of;
use std::time::Duration;
use tracing::{debug, info, warn};
use windows::core::{w, HSTRING, PCWSTR, PWSTR};
use windows::Win32::Foundation::{ERROR_NO_MORE_ITEMS, ERROR_SUCCESS, LPARAM, WPARAM};
use windows::Win32::System::Registry::{
    RegCloseKey, RegEnumKeyExW, RegGetValueW, RegOpenKeyExW, HKEY, HKEY_LOCAL_MACHINE, KEY_READ,
    RRF_RT_REG_SZ,
};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    GetKeyboardLayout, GetKeyboardLayoutList, LoadKeyboardLayoutW, SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT,
    KEYBD_EVENT_FLAGS, KEYEVENTF_KEYUP, KLF_ACTIVATE, VIRTUAL_KEY, VK_CONTROL, VK_LWIN, VK_MENU,
    VK_SHIFT,
};
use windows::Win32::UI::TextServices::HKL;
use windows::Win32::UI::WindowsAndMessaging::{
    GetForegroundWindow, GetWindowThreadProcessId, PostMessageW, WM_INPUTLANGCHANGEREQUEST,
};

use super::{klid_from_hkl, LayoutVariants};
use super::r#trait::{LayoutActuator, LayoutProbe};

/// Раскладка активного окна через user32: чтение `GetKeyboardLayout`,
/// прямая активация `LoadKeyboardLayoutW` + `WM_INPUTLANGCHANGEREQUEST`,
/// слепое переключение аккордом через `SendInput`.
pub struct Win32Keyboard {
    chord: ToggleChord,
    settle_delay: Duration,
    variants: LayoutVariants,
}

impl Win32Keyboard {
    pub fn new(chord: ToggleChord, settle_delay: Duration) -> Self {
        let variants = match read_layout_variants() {
            Ok(variants) => {
                info!("Загружено особых раскладок из реестра: {}", variants.len());
                variants
            }
            Err(e) => {
                warn!("Не удалось прочитать раскладки из реестра: {}", e);
                LayoutVariants::default()
            }
        };

        Self {
            chord,
            settle_delay,
            variants,
        }
    }

    // Смена раскладки применяется асинхронно потоком окна
    fn settle(&self) {
        if !self.settle_delay.is_zero() {
            std::thread::sleep(self.settle_delay);
        }
    }
}

impl LayoutProbe for Win32Keyboard {
    fn current_layout(&self) -> Result<LayoutId> {
        let hwnd = unsafe { GetForegroundWindow() };
        if hwnd.0 == 0 {
            return Err(SyncError::Platform("нет активного окна".to_string()));
        }

        let thread_id = unsafe { GetWindowThreadProcessId(hwnd, None) };
        let hkl = unsafe { GetKeyboardLayout(thread_id) };
        Ok(klid_from_hkl(hkl.0 as usize, &self.variants))
    }

    fn installed_layouts(&self) -> Result<Vec<LayoutId>> {
        let count = unsafe { GetKeyboardLayoutList(None) };
        let mut handles = vec![HKL::default(); count.max(0) as usize];
        let filled = unsafe { GetKeyboardLayoutList(Some(&mut handles)) };
        handles.truncate(filled.max(0) as usize);

        Ok(handles
            .iter()
            .map(|hkl| klid_from_hkl(hkl.0 as usize, &self.variants))
            .collect())
    }
}

impl LayoutActuator for Win32Keyboard {
    fn activate(&self, layout: &LayoutId) -> Result<()> {
        let klid = layout
            .to_klid()
            .ok_or_else(|| sync_error!(invalid_layout, "'{}' не является KLID", layout))?;

        let klid = HSTRING::from(format!("{:08X}", klid));
        let hkl = unsafe { LoadKeyboardLayoutW(&klid, KLF_ACTIVATE) }?;

        let hwnd = unsafe { GetForegroundWindow() };
        if hwnd.0 != 0 {
            unsafe { PostMessageW(hwnd, WM_INPUTLANGCHANGEREQUEST, WPARAM(0), LPARAM(hkl.0)) }?;
        }
        debug!("Запрошена раскладка {} для активного окна", layout);

        self.settle();
        Ok(())
    }

    fn toggle(&self) -> Result<()> {
        let primary = virtual_key(self.chord.primary);
        let secondary = virtual_key(self.chord.secondary);
        let inputs = [
            key_input(primary, false),
            key_input(secondary, false),
            key_input(secondary, true),
            key_input(primary, true),
        ];

        let sent = unsafe { SendInput(&inputs, size_of::<INPUT>() as i32) };
        if sent as usize != inputs.len() {
            return Err(sync_error!(
                platform,
                "SendInput отправил {} из {} событий аккорда {}",
                sent,
                inputs.len(),
                self.chord
            ));
        }
        debug!("Отправлен аккорд {}", self.chord);

        self.settle();
        Ok(())
    }
}

fn virtual_key(modifier: Modifier) -> VIRTUAL_KEY {
    match modifier {
        Modifier::Ctrl => VK_CONTROL,
        Modifier::Alt => VK_MENU,
        Modifier::Shift => VK_SHIFT,
        Modifier::Win => VK_LWIN,
    }
}

fn key_input(vk: VIRTUAL_KEY, key_up: bool) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: vk,
                wScan: 0,
                dwFlags: if key_up { KEYEVENTF_KEYUP } else { KEYBD_EVENT_FLAGS(0) },
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

const KEYBOARD_LAYOUTS_KEY: PCWSTR = w!(r"SYSTEM\CurrentControlSet\Control\Keyboard Layouts");

struct RegKey(HKEY);

impl Drop for RegKey {
    fn drop(&mut self) {
        unsafe {
            let _ = RegCloseKey(self.0);
        }
    }
}

/// Читает `Layout Id` всех разделов `Keyboard Layouts`
fn read_layout_variants() -> Result<LayoutVariants> {
    let mut hkey = HKEY::default();
    unsafe { RegOpenKeyExW(HKEY_LOCAL_MACHINE, KEYBOARD_LAYOUTS_KEY, 0, KEY_READ, &mut hkey) }.ok()?;
    let key = RegKey(hkey);

    let mut entries = Vec::new();
    for index in 0.. {
        let mut name = [0u16; 64];
        let mut len = name.len() as u32;
        let status = unsafe {
            RegEnumKeyExW(
                key.0,
                index,
                PWSTR(name.as_mut_ptr()),
                &mut len,
                None,
                PWSTR::null(),
                None,
                None,
            )
        };
        if status == ERROR_NO_MORE_ITEMS {
            break;
        }
        if status != ERROR_SUCCESS {
            continue;
        }

        let klid = String::from_utf16_lossy(&name[..len as usize]);
        if let Some(layout_id) = read_string_value(&key, &klid, w!("Layout Id")) {
            entries.push((klid, layout_id));
        }
    }

    Ok(LayoutVariants::from_entries(entries))
}

fn read_string_value(key: &RegKey, subkey: &str, value: PCWSTR) -> Option<String> {
    let subkey = HSTRING::from(subkey);
    let mut buffer = [0u16; 64];
    let mut size = (buffer.len() * size_of::<u16>()) as u32;

    unsafe {
        RegGetValueW(
            key.0,
            &subkey,
            value,
            RRF_RT_REG_SZ,
            None,
            Some(buffer.as_mut_ptr().cast()),
            Some(&mut size),
        )
    }
    .ok()
    .ok()?;

    // size в байтах и включает завершающий ноль
    let chars = (size as usize / size_of::<u16>()).saturating_sub(1);
    Some(String::from_utf16_lossy(&buffer[..chars.min(buffer.len())]))
}
