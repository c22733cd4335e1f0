use crate::events::{LayoutId, SwitchStrategy, ToggleChord};
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub associations: AssociationsConfig,
    pub switching: SwitchingConfig,
    pub feed: FeedConfig,
    pub control: ControlConfig,
    pub dry_run: DryRunConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssociationsConfig {
    pub path: PathBuf,
    /// 0 - горячая перезагрузка файла ассоциаций отключена
    pub reload_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SwitchingConfig {
    pub strategy: SwitchStrategy,
    pub toggle_chord: ToggleChord,
    /// Пауза после переключения перед повторным чтением раскладки
    pub settle_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    pub mode: String,
    pub polling_interval_ms: u64,
}

/// Канал управления работающим экземпляром (ручное переключение из CLI)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    pub enabled: bool,
    pub address: SocketAddr,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DryRunConfig {
    pub layouts: Vec<String>,
    pub applications: Vec<String>,
    pub interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            associations: AssociationsConfig {
                path: PathBuf::from("associations.json"),
                reload_interval_ms: 2000,
            },
            switching: SwitchingConfig {
                strategy: SwitchStrategy::Direct,
                toggle_chord: ToggleChord::default(),
                settle_delay_ms: 40,
            },
            feed: FeedConfig {
                mode: "hook".to_string(),
                polling_interval_ms: 250,
            },
            control: ControlConfig {
                enabled: true,
                address: SocketAddr::from(([127, 0, 0, 1], 47119)),
            },
            dry_run: DryRunConfig {
                layouts: vec!["0000040C".to_string(), "00000409".to_string()],
                applications: vec![
                    "explorer.exe".to_string(),
                    "code.exe".to_string(),
                    "code.exe".to_string(),
                    "notepad.exe".to_string(),
                ],
                interval_ms: 5000,
            },
        }
    }
}

impl Config {
    /// Загружает конфигурацию: значения по умолчанию, затем TOML-файл (может
    /// отсутствовать), затем переменные окружения `LAYOUT_SYNC_*`.
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("LAYOUT_SYNC_").split("__"));

        let config: Config = figment
            .extract()
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        if self.associations.path.as_os_str().is_empty() {
            anyhow::bail!("associations.path не может быть пустым");
        }

        if self.associations.reload_interval_ms != 0 && self.associations.reload_interval_ms < 100 {
            anyhow::bail!("reload_interval_ms должно быть 0 или минимум 100");
        }

        if self.switching.settle_delay_ms > 1000 {
            anyhow::bail!("settle_delay_ms должно быть не больше 1000");
        }

        match self.feed.mode.as_str() {
            "hook" | "polling" => {}
            _ => anyhow::bail!("Неверный режим отслеживания окон: {}", self.feed.mode),
        }

        if self.feed.polling_interval_ms < 50 {
            anyhow::bail!("polling_interval_ms должно быть минимум 50");
        }

        if !self.control.address.ip().is_loopback() {
            anyhow::bail!(
                "control.address должен быть локальным адресом: {}",
                self.control.address
            );
        }

        if self.dry_run.layouts.is_empty() {
            anyhow::bail!("dry_run.layouts должен содержать хотя бы одну раскладку");
        }

        for (i, layout) in self.dry_run.layouts.iter().enumerate() {
            let id = LayoutId::new(layout.as_str())
                .with_context(|| format!("Пустая раскладка в dry_run.layouts #{}", i + 1))?;
            if !id.is_well_formed() {
                anyhow::bail!("Неверный KLID '{}' в dry_run.layouts #{}", layout, i + 1);
            }
        }

        if self.dry_run.interval_ms < 100 {
            anyhow::bail!("dry_run.interval_ms должно быть минимум 100");
        }

        Ok(())
    }

    /// Раскладки имитируемой клавиатуры в порядке ротации
    pub fn dry_run_layouts(&self) -> Vec<LayoutId> {
        self.dry_run
            .layouts
            .iter()
            .filter_map(|layout| LayoutId::new(layout.as_str()).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.switching.strategy, SwitchStrategy::Direct);
        assert_eq!(config.dry_run_layouts().len(), 2);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.associations.path, PathBuf::from("associations.json"));
        assert_eq!(config.feed.mode, "hook");
        assert!(config.control.enabled);
        assert!(config.control.address.ip().is_loopback());
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout-sync.toml");
        std::fs::write(
            &path,
            r#"
[switching]
strategy = "toggle"
toggle_chord = "ctrl+shift"

[feed]
mode = "polling"

[control]
address = "127.0.0.1:50123"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.switching.strategy, SwitchStrategy::Toggle);
        assert_eq!(config.switching.toggle_chord.to_string(), "ctrl+shift");
        assert_eq!(config.switching.settle_delay_ms, 40);
        assert_eq!(config.feed.mode, "polling");
        assert_eq!(config.feed.polling_interval_ms, 250);
        assert_eq!(config.control.address.port(), 50123);
        assert!(config.control.enabled);
    }

    #[test]
    fn test_bad_toggle_chord_is_reported_as_chord() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout-sync.toml");
        std::fs::write(&path, "[switching]\ntoggle_chord = \"alt+hyper\"\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("аккорд"), "{}", message);
        assert!(!message.contains("ассоциац"), "{}", message);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = Config::default();
        config.feed.mode = "dbus".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.dry_run.layouts = vec!["azerty".to_string()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.associations.reload_interval_ms = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.control.address = SocketAddr::from(([0, 0, 0, 0], 47119));
        assert!(config.validate().is_err());
    }
}
