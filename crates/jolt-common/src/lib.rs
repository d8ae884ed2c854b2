pub mod error;
pub mod formatter;
pub mod pattern;
pub mod protocol;
pub mod settings;
