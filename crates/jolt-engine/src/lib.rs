pub mod classifier;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod frontend;
pub mod inspector;
pub mod overlay;
pub mod relay;
pub mod store;

pub use jolt_common::formatter;
pub use jolt_common::pattern;
pub use jolt_common::protocol;
pub use jolt_common::settings;
