use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Идентификатор раскладки (KLID): 8 шестнадцатеричных цифр, например `0000040C`.
///
/// Сравнение регистронезависимое. Значение хранится в том виде, в каком его задал
/// пользователь: некорректные идентификаторы допускаются и просто никогда не
/// совпадут с реально активной раскладкой.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayoutId(String);

impl LayoutId {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SyncError::InvalidLayout("пустой идентификатор раскладки".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Каноничная форма из числового KLID: `0x409` -> `00000409`.
    pub fn from_klid(klid: u32) -> Self {
        Self(format!("{:08X}", klid))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_well_formed(&self) -> bool {
        self.0.len() == 8 && self.0.chars().all(|c| c.is_ascii_hexdigit())
    }

    #[allow(dead_code)]
    pub fn to_klid(&self) -> Option<u32> {
        if !self.is_well_formed() {
            return None;
        }
        u32::from_str_radix(&self.0, 16).ok()
    }
}

impl PartialEq for LayoutId {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for LayoutId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_uppercase());
        }
    }
}

impl FromStr for LayoutId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for LayoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_equality() {
        let upper = LayoutId::new("0000040C").unwrap();
        let lower = LayoutId::new("0000040c").unwrap();
        assert_eq!(upper, lower);
        assert_ne!(upper, LayoutId::new("00000409").unwrap());
    }

    #[test]
    fn test_from_klid_is_zero_padded() {
        assert_eq!(LayoutId::from_klid(0x409).as_str(), "00000409");
        assert_eq!(LayoutId::from_klid(0x0001_0409).as_str(), "00010409");
    }

    #[test]
    fn test_empty_is_rejected_but_malformed_is_kept() {
        assert!(LayoutId::new("   ").is_err());

        let malformed = LayoutId::new("qwerty").unwrap();
        assert!(!malformed.is_well_formed());
        assert_eq!(malformed.to_klid(), None);
    }

    #[test]
    fn test_to_klid() {
        let id: LayoutId = " 0000040c ".parse().unwrap();
        assert!(id.is_well_formed());
        assert_eq!(id.to_klid(), Some(0x40C));
    }
}
