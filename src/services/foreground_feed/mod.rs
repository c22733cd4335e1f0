//! ForegroundFeed service: responsibility and boundaries
//!
//! This module and its submodules are responsible ONLY for noticing that another
//! application took the foreground, resolving its executable name and pushing a
//! ForegroundEvent into the engine queue. It MUST NOT contain any layout logic:
//! all switching decisions are made exclusively by SyncEngine.
//! Transitions whose owning process cannot be resolved are dropped here.

mod dry_run;
mod r#trait;
#[cfg(windows)]
mod win32;

pub use self::dry_run::DryRunFeed;
pub use self::r#trait::{create_foreground_feed, ForegroundFeed};
