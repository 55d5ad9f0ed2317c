//! Database query operations organized by table

pub mod entries;
pub mod stats;
pub mod sync_metadata;
pub mod system;

// Re-export commonly used query functions
pub use entries::{delete_entry, fetch_entry, insert_entry, list_entries, update_entry};
pub use stats::get_statistics;
pub use sync_metadata::{fetch_metadata, merge_update, write_metadata};
pub use system::{get_value, set_value, CHECKPOINT_KEY};
