mod config_cmd;
mod status_cmd;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use status_cmd::StatusCommand;
pub use sync_cmd::SyncCommand;
