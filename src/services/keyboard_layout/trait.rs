use crate::config::Config;
use crate::error::Result;
use crate::events::{LayoutId, SwitchStrategy};
use std::sync::Arc;

/// Reports the layout active for the current foreground context.
pub trait LayoutProbe: Send + Sync {
    fn current_layout(&self) -> Result<LayoutId>;

    /// Layouts registered in the user session, in switching order
    fn installed_layouts(&self) -> Result<Vec<LayoutId>> {
        Ok(vec![self.current_layout()?])
    }
}

/// Forces a layout change. Both operations are fire-and-forget for the engine,
/// which always re-probes afterwards instead of trusting the result.
pub trait LayoutActuator: Send + Sync {
    /// Direct activation of an exact layout identifier
    fn activate(&self, layout: &LayoutId) -> Result<()>;

    /// Blind rotation to the next registered layout
    fn toggle(&self) -> Result<()>;

    fn switch(&self, strategy: SwitchStrategy, target: &LayoutId) -> Result<()> {
        match strategy {
            SwitchStrategy::Direct => self.activate(target),
            SwitchStrategy::Toggle => self.toggle(),
        }
    }
}

/// Probe and actuator of one platform backend
#[derive(Clone)]
pub struct KeyboardBackend {
    pub probe: Arc<dyn LayoutProbe>,
    pub actuator: Arc<dyn LayoutActuator>,
}

/// Factory function to create an appropriate keyboard backend based on the dry_run flag
pub fn create_keyboard_backend(config: &Config, dry_run: bool) -> Result<KeyboardBackend> {
    if dry_run {
        let keyboard = Arc::new(super::dry_run::DryRunKeyboard::new(config.dry_run_layouts())?);
        return Ok(KeyboardBackend {
            probe: keyboard.clone(),
            actuator: keyboard,
        });
    }

    #[cfg(windows)]
    {
        let keyboard = Arc::new(super::win32::Win32Keyboard::new(
            config.switching.toggle_chord,
            std::time::Duration::from_millis(config.switching.settle_delay_ms),
        ));
        Ok(KeyboardBackend {
            probe: keyboard.clone(),
            actuator: keyboard,
        })
    }

    #[cfg(not(windows))]
    {
        Err(crate::error::SyncError::ServiceUnavailable(
            "управление раскладкой поддерживается только в Windows, используйте --dry-run".to_string(),
        ))
    }
}
