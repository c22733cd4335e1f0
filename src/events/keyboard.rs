use crate::error::{Result, SyncError};
use crate::sync_error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Клавиша-модификатор, участвующая в аккорде переключения раскладки
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
    Win,
}

impl FromStr for Modifier {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ctrl" | "control" => Ok(Modifier::Ctrl),
            "alt" => Ok(Modifier::Alt),
            "shift" => Ok(Modifier::Shift),
            "win" | "super" | "meta" => Ok(Modifier::Win),
            other => Err(sync_error!(invalid_chord, "неизвестный модификатор '{}'", other)),
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Modifier::Ctrl => "ctrl",
            Modifier::Alt => "alt",
            Modifier::Shift => "shift",
            Modifier::Win => "win",
        };
        f.write_str(name)
    }
}

/// Аккорд слепого переключения: `primary` удерживается, `secondary` нажимается и
/// отпускается, затем отпускается `primary`. ОС переходит к следующей раскладке.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ToggleChord {
    pub primary: Modifier,
    pub secondary: Modifier,
}

impl ToggleChord {
    pub fn new(primary: Modifier, secondary: Modifier) -> Self {
        Self { primary, secondary }
    }
}

impl Default for ToggleChord {
    fn default() -> Self {
        Self::new(Modifier::Alt, Modifier::Shift)
    }
}

impl FromStr for ToggleChord {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('+').collect();
        if parts.len() != 2 {
            return Err(sync_error!(
                invalid_chord,
                "аккорд должен состоять из двух модификаторов: '{}'",
                s
            ));
        }

        let primary: Modifier = parts[0].parse()?;
        let secondary: Modifier = parts[1].parse()?;
        if primary == secondary {
            return Err(sync_error!(invalid_chord, "модификаторы аккорда совпадают: '{}'", s));
        }

        Ok(Self::new(primary, secondary))
    }
}

impl TryFrom<String> for ToggleChord {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ToggleChord> for String {
    fn from(chord: ToggleChord) -> Self {
        chord.to_string()
    }
}

impl fmt::Display for ToggleChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.primary, self.secondary)
    }
}

/// Способ принудительной смены раскладки
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchStrategy {
    /// Активация конкретного KLID для активного окна
    Direct,
    /// Слепой аккорд, переход к следующей раскладке. Гарантированно попадает в цель
    /// только когда в системе зарегистрировано ровно две раскладки.
    Toggle,
}

impl fmt::Display for SwitchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchStrategy::Direct => f.write_str("direct"),
            SwitchStrategy::Toggle => f.write_str("toggle"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chord_parsing() {
        let chord: ToggleChord = "Alt+Shift".parse().unwrap();
        assert_eq!(chord, ToggleChord::default());

        let chord: ToggleChord = "ctrl + shift".parse().unwrap();
        assert_eq!(chord.primary, Modifier::Ctrl);
        assert_eq!(chord.secondary, Modifier::Shift);
        assert_eq!(chord.to_string(), "ctrl+shift");
    }

    #[test]
    fn test_invalid_chords() {
        assert!("alt".parse::<ToggleChord>().is_err());
        assert!("alt+alt".parse::<ToggleChord>().is_err());
        assert!("alt+hyper".parse::<ToggleChord>().is_err());
        assert!("alt+shift+ctrl".parse::<ToggleChord>().is_err());
    }

    #[test]
    fn test_chord_errors_are_chord_errors() {
        for raw in ["alt", "alt+alt", "alt+hyper"] {
            let err = raw.parse::<ToggleChord>().unwrap_err();
            assert!(matches!(err, SyncError::InvalidChord(_)), "{}: {:?}", raw, err);
        }
    }
}
