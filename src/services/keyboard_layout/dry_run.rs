use crate::error::{Result, SyncError};
use crate::sync_error;
use crate::events::LayoutId;
use parking_lot::Mutex;
use tracing::info;

use super::r#trait::{LayoutActuator, LayoutProbe};

/// Имитация клавиатуры: фиксированная ротация раскладок, как в системе с
/// несколькими зарегистрированными раскладками.
pub struct DryRunKeyboard {
    layouts: Vec<LayoutId>,
    current: Mutex<usize>,
}

impl DryRunKeyboard {
    pub fn new(layouts: Vec<LayoutId>) -> Result<Self> {
        if layouts.is_empty() {
            return Err(SyncError::InvalidLayout(
                "для dry-run нужна хотя бы одна раскладка".to_string(),
            ));
        }

        info!("Dry-run клавиатура с раскладками: {:?}", layouts);
        Ok(Self {
            layouts,
            current: Mutex::new(0),
        })
    }
}

impl LayoutProbe for DryRunKeyboard {
    fn current_layout(&self) -> Result<LayoutId> {
        Ok(self.layouts[*self.current.lock()].clone())
    }

    fn installed_layouts(&self) -> Result<Vec<LayoutId>> {
        Ok(self.layouts.clone())
    }
}

impl LayoutActuator for DryRunKeyboard {
    fn activate(&self, layout: &LayoutId) -> Result<()> {
        let index = self
            .layouts
            .iter()
            .position(|registered| registered == layout)
            .ok_or_else(|| sync_error!(invalid_layout, "раскладка {} не зарегистрирована", layout))?;

        *self.current.lock() = index;
        info!("[DRY RUN] Активирована раскладка {}", layout);
        Ok(())
    }

    fn toggle(&self) -> Result<()> {
        let mut current = self.current.lock();
        *current = (*current + 1) % self.layouts.len();
        info!("[DRY RUN] Аккорд переключения, теперь {}", self.layouts[*current]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SwitchStrategy;

    fn layouts(ids: &[&str]) -> Vec<LayoutId> {
        ids.iter().map(|id| LayoutId::new(*id).unwrap()).collect()
    }

    #[test]
    fn test_requires_layouts() {
        assert!(DryRunKeyboard::new(Vec::new()).is_err());
    }

    #[test]
    fn test_installed_layouts_are_configured_ones() {
        let keyboard = DryRunKeyboard::new(layouts(&["0000040C", "00000409"])).unwrap();
        keyboard.toggle().unwrap();

        assert_eq!(keyboard.installed_layouts().unwrap(), layouts(&["0000040C", "00000409"]));
    }

    #[test]
    fn test_toggle_rotates_through_layouts() {
        let keyboard = DryRunKeyboard::new(layouts(&["0000040C", "00000409", "00000419"])).unwrap();

        keyboard.toggle().unwrap();
        assert_eq!(keyboard.current_layout().unwrap().as_str(), "00000409");
        keyboard.toggle().unwrap();
        keyboard.toggle().unwrap();
        assert_eq!(keyboard.current_layout().unwrap().as_str(), "0000040C");
    }

    #[test]
    fn test_direct_activation_only_for_registered_layouts() {
        let keyboard = DryRunKeyboard::new(layouts(&["0000040C", "00000409"])).unwrap();

        let us = LayoutId::new("00000409").unwrap();
        keyboard.switch(SwitchStrategy::Direct, &us).unwrap();
        assert_eq!(keyboard.current_layout().unwrap(), us);

        let ru = LayoutId::new("00000419").unwrap();
        assert!(keyboard.activate(&ru).is_err());
        assert_eq!(keyboard.current_layout().unwrap(), us);
    }
}
