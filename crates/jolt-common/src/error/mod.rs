pub mod protocol_error;
pub mod relay_error;
pub mod settings_error;

pub use protocol_error::ProtocolError;
pub use relay_error::RelayError;
pub use settings_error::SettingsError;
