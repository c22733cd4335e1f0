//! Association table: executable name -> desired keyboard layout.
//!
//! The table is read on the hot path by the sync engine and written on the cold
//! path (CLI edits, hot reload). All access goes through a single `RwLock`; a load
//! builds the new map first and swaps it in one write, so readers never observe a
//! half-loaded table.
//!
//! Every entry point normalizes the key with [`normalize_executable_key`].

use crate::debug_if_enabled;
use crate::error::{Result, SyncError};
use crate::events::LayoutId;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

/// Нормализует имя исполняемого файла: отбрасывает каталог, приводит к нижнему
/// регистру и добавляет суффикс исполняемых файлов платформы, если его нет.
///
/// Возвращает `None` для пустого имени.
pub fn normalize_executable_key(name: &str) -> Option<String> {
    let trimmed = name.trim();
    let file_name = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed).trim();
    if file_name.is_empty() {
        return None;
    }

    let mut key = file_name.to_lowercase();
    let suffix = std::env::consts::EXE_SUFFIX;
    if !suffix.is_empty() && !key.ends_with(suffix) {
        key.push_str(suffix);
    }
    Some(key)
}

pub struct AssociationTable {
    path: PathBuf,
    entries: RwLock<HashMap<String, LayoutId>>,
    // Отпечаток файла на момент последней загрузки/сохранения
    source_stamp: Mutex<Option<SourceStamp>>,
}

/// mtime и размер файла. Одного mtime мало: на ФС с грубым временем (FAT - 2 с)
/// две записи подряд дают одинаковое время.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SourceStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl AssociationTable {
    /// Пустая таблица, привязанная к файлу `path` (файл не читается)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(HashMap::new()),
            source_stamp: Mutex::new(None),
        }
    }

    /// Создаёт таблицу и загружает её из файла. Отсутствующий или повреждённый
    /// файл даёт пустую таблицу.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let table = Self::new(path);
        table.load();
        table
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, executable: &str) -> Option<LayoutId> {
        let key = normalize_executable_key(executable)?;
        self.entries.read().get(&key).cloned()
    }

    /// Добавляет или перезаписывает ассоциацию. Возвращает предыдущее значение.
    pub fn put(&self, executable: &str, layout: LayoutId) -> Result<Option<LayoutId>> {
        let key = normalize_executable_key(executable).ok_or_else(|| {
            SyncError::InvalidAssociation("пустое имя исполняемого файла".to_string())
        })?;

        if !layout.is_well_formed() {
            warn!(
                "Раскладка '{}' для {} не похожа на KLID из 8 hex-цифр, переключение может не сработать",
                layout, key
            );
        }

        debug_if_enabled!("Ассоциация {} -> {}", key, layout);
        Ok(self.entries.write().insert(key, layout))
    }

    pub fn remove(&self, executable: &str) -> bool {
        match normalize_executable_key(executable) {
            Some(key) => self.entries.write().remove(&key).is_some(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Снимок ассоциаций, отсортированный по имени
    pub fn entries(&self) -> Vec<(String, LayoutId)> {
        let entries = self.entries.read();
        let mut snapshot: Vec<(String, LayoutId)> = entries
            .iter()
            .map(|(key, layout)| (key.clone(), layout.clone()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    /// Полностью заменяет содержимое таблицы данными из файла. Возвращает число
    /// загруженных ассоциаций; ошибки чтения дают пустую таблицу.
    pub fn load(&self) -> usize {
        let stamp = source_stamp(&self.path);

        let loaded = if self.path.exists() {
            match read_entries(&self.path) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        "Не удалось прочитать ассоциации из {:?}: {}. Используется пустая таблица",
                        self.path, e
                    );
                    HashMap::new()
                }
            }
        } else {
            info!("Файл ассоциаций {:?} не найден, таблица пуста", self.path);
            HashMap::new()
        };

        let count = loaded.len();
        *self.entries.write() = loaded;
        *self.source_stamp.lock() = stamp;

        info!("Загружено ассоциаций: {} из {:?}", count, self.path);
        count
    }

    /// Полностью перезаписывает файл текущим содержимым таблицы
    pub fn save(&self) -> Result<()> {
        let snapshot: BTreeMap<String, String> = self
            .entries
            .read()
            .iter()
            .map(|(key, layout)| (key.clone(), layout.to_string()))
            .collect();

        let json = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Пишем во временный файл и переименовываем, чтобы читатель не увидел обрывок
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;

        *self.source_stamp.lock() = source_stamp(&self.path);
        info!("Сохранено ассоциаций: {} в {:?}", snapshot.len(), self.path);
        Ok(())
    }

    /// Перечитывает файл, если он изменился с момента последней загрузки/сохранения
    pub fn reload_if_changed(&self) -> bool {
        let stamp = source_stamp(&self.path);
        if stamp == *self.source_stamp.lock() {
            return false;
        }

        info!("Файл ассоциаций {:?} изменился, перезагрузка", self.path);
        self.load();
        true
    }
}

fn source_stamp(path: &Path) -> Option<SourceStamp> {
    let metadata = fs::metadata(path).ok()?;
    Some(SourceStamp {
        modified: metadata.modified().ok(),
        len: metadata.len(),
    })
}

fn read_entries(path: &Path) -> Result<HashMap<String, LayoutId>> {
    let content = fs::read_to_string(path)?;
    let raw: HashMap<String, String> = serde_json::from_str(&content)?;

    let mut entries = HashMap::with_capacity(raw.len());
    for (executable, layout) in raw {
        let Some(key) = normalize_executable_key(&executable) else {
            warn!("Пропущена ассоциация с пустым именем приложения");
            continue;
        };
        match LayoutId::new(layout) {
            Ok(layout) => {
                entries.insert(key, layout);
            }
            Err(_) => warn!("Пропущена ассоциация {} с пустой раскладкой", key),
        }
    }
    Ok(entries)
}
