use std::fmt;
use std::time::Instant;

/// Событие смены активного (foreground) приложения
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundEvent {
    /// Имя исполняемого файла в том виде, в каком его вернула ОС
    pub executable: String,
    pub pid: Option<u32>,
    pub timestamp: Instant,
}

impl ForegroundEvent {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            pid: None,
            timestamp: Instant::now(),
        }
    }

    #[allow(dead_code)]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }
}

impl fmt::Display for ForegroundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pid {
            Some(pid) => write!(
                f,
                "\"{}\" (pid {}, {}ms ago)",
                self.executable,
                pid,
                self.timestamp.elapsed().as_millis()
            ),
            None => write!(
                f,
                "\"{}\" ({}ms ago)",
                self.executable,
                self.timestamp.elapsed().as_millis()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreground_event_creation() {
        let event = ForegroundEvent::new("Code.exe").with_pid(4242);

        assert_eq!(event.executable, "Code.exe");
        assert_eq!(event.pid, Some(4242));
        assert!(event.to_string().starts_with("\"Code.exe\" (pid 4242"));
    }
}
