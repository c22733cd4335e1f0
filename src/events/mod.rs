pub mod command;
pub mod keyboard;
pub mod layout;
pub mod status;
pub mod window;

pub use command::EngineCommand;
pub use keyboard::{Modifier, SwitchStrategy, ToggleChord};
pub use layout::LayoutId;
pub use status::{SyncStatus, TargetSource};
pub use window::ForegroundEvent;
