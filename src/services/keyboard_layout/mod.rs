//! Keyboard layout service: probing the active layout and forcing a change.
//!
//! This module only talks to the platform. It never decides *whether* to switch;
//! that belongs to the sync engine.

mod dry_run;
mod r#trait;
#[cfg(windows)]
mod win32;

pub use self::dry_run::DryRunKeyboard;
pub use self::r#trait::{create_keyboard_backend, KeyboardBackend, LayoutActuator, LayoutProbe};

use crate::events::LayoutId;
use std::collections::HashMap;
use tracing::warn;

/// Особые раскладки (варианты вроде US-Dvorak): `Layout Id` из раздела реестра
/// `Keyboard Layouts` -> KLID раздела. В HKL такой раскладки старшее слово
/// равно `0xF000 | Layout Id`.
#[derive(Debug, Clone, Default)]
pub struct LayoutVariants {
    by_layout_id: HashMap<u16, LayoutId>,
}

#[cfg_attr(not(windows), allow(dead_code))]
impl LayoutVariants {
    /// Строит таблицу из пар (имя раздела, значение `Layout Id`). Разделы без
    /// корректного KLID или `Layout Id` пропускаются.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut variants = Self::default();
        for (klid, layout_id) in entries {
            let Ok(klid) = LayoutId::new(klid.as_ref()) else {
                continue;
            };
            if !klid.is_well_formed() {
                continue;
            }
            if let Ok(layout_id) = u16::from_str_radix(layout_id.as_ref().trim(), 16) {
                variants.by_layout_id.insert(layout_id, klid);
            }
        }
        variants
    }

    pub fn get(&self, layout_id: u16) -> Option<&LayoutId> {
        self.by_layout_id.get(&layout_id)
    }

    pub fn len(&self) -> usize {
        self.by_layout_id.len()
    }
}

/// Переводит HKL в KLID. Младшее слово HKL - язык ввода, старшее - устройство:
/// - `0` - раскладка языка по умолчанию, KLID совпадает с языком;
/// - `0xExxx` - IME, KLID совпадает с самим HKL;
/// - `0xFxxx` - особая раскладка, KLID ищется в `variants` по `Layout Id`;
/// - иначе старшее слово - язык раскладки (например, US на французском вводе).
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn klid_from_hkl(raw: usize, variants: &LayoutVariants) -> LayoutId {
    let raw = raw as u32;
    let language = raw & 0xFFFF;
    let device = raw >> 16;

    if device == 0 {
        return LayoutId::from_klid(language);
    }

    match device & 0xF000 {
        0xE000 => LayoutId::from_klid(raw),
        0xF000 => {
            let layout_id = (device & 0x0FFF) as u16;
            match variants.get(layout_id) {
                Some(klid) => klid.clone(),
                None => {
                    warn!(
                        "Неизвестная особая раскладка (HKL {:08X}, Layout Id {:04X}), используется язык",
                        raw, layout_id
                    );
                    LayoutId::from_klid(language)
                }
            }
        }
        _ => LayoutId::from_klid(device),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variants() -> LayoutVariants {
        LayoutVariants::from_entries([
            ("00010409", "0002"),
            ("00020409", "0001"),
            ("00010419", "0008"),
            ("00000409", ""),
            ("garbage", "0003"),
        ])
    }

    #[test]
    fn test_variants_from_registry_entries() {
        let variants = variants();
        assert_eq!(variants.len(), 3);
        assert_eq!(variants.get(0x0002).map(|l| l.as_str()), Some("00010409"));
        assert_eq!(variants.get(0x0003), None);
    }

    #[test]
    fn test_klid_from_default_hkl() {
        assert_eq!(klid_from_hkl(0x040C_040C, &variants()).as_str(), "0000040C");
        assert_eq!(klid_from_hkl(0x0000_0409, &variants()).as_str(), "00000409");
    }

    #[test]
    fn test_klid_uses_device_word() {
        // US-раскладка на французском языке ввода
        assert_eq!(klid_from_hkl(0x0409_040C, &variants()).as_str(), "00000409");
    }

    #[test]
    fn test_klid_for_variant_layouts() {
        // US-Dvorak
        assert_eq!(klid_from_hkl(0xF002_0409, &variants()).as_str(), "00010409");
        // US-International
        assert_eq!(klid_from_hkl(0xF001_0409, &variants()).as_str(), "00020409");
        // Вариант не зависит от языка ввода, на котором он загружен
        assert_eq!(klid_from_hkl(0xF002_0407, &variants()).as_str(), "00010409");
    }

    #[test]
    fn test_unknown_variant_falls_back_to_language() {
        assert_eq!(klid_from_hkl(0xF00F_0409, &variants()).as_str(), "00000409");
        assert_eq!(
            klid_from_hkl(0xF002_0409, &LayoutVariants::default()).as_str(),
            "00000409"
        );
    }

    #[test]
    fn test_klid_for_ime() {
        assert_eq!(klid_from_hkl(0xE001_0411, &variants()).as_str(), "E0010411");
    }
}
