use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Ошибка конфигурации: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ошибка JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Некорректная ассоциация: {0}")]
    InvalidAssociation(String),

    #[error("Некорректная раскладка: {0}")]
    InvalidLayout(String),

    #[error("Некорректный аккорд переключения: {0}")]
    InvalidChord(String),

    #[error("Ошибка платформы: {0}")]
    Platform(String),

    #[error("Сервис недоступен: {0}")]
    ServiceUnavailable(String),

    #[error("Внутренняя ошибка: {0}")]
    Internal(String),
}

#[cfg(windows)]
impl From<windows::core::Error> for SyncError {
    fn from(err: windows::core::Error) -> Self {
        SyncError::Platform(err.message().to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! sync_error {
    (invalid_association, $($arg:tt)*) => {
        $crate::error::SyncError::InvalidAssociation(format!($($arg)*))
    };
    (invalid_layout, $($arg:tt)*) => {
        $crate::error::SyncError::InvalidLayout(format!($($arg)*))
    };
    (invalid_chord, $($arg:tt)*) => {
        $crate::error::SyncError::InvalidChord(format!($($arg)*))
    };
    (platform, $($arg:tt)*) => {
        $crate::error::SyncError::Platform(format!($($arg)*))
    };
    (service_unavailable, $($arg:tt)*) => {
        $crate::error::SyncError::ServiceUnavailable(format!($($arg)*))
    };
    (internal, $($arg:tt)*) => {
        $crate::error::SyncError::Internal(format!($($arg)*))
    };
}
