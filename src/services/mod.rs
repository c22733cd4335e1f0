pub mod association_table;
pub mod baseline;
pub mod control;
pub mod foreground_feed;
pub mod keyboard_layout;
pub mod sync_engine;

pub use association_table::AssociationTable;
pub use foreground_feed::create_foreground_feed;
pub use keyboard_layout::create_keyboard_backend;
pub use sync_engine::SyncEngine;
