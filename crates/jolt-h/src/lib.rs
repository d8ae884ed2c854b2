pub mod cdp;
pub mod features;
pub mod filter;
pub mod monitor;
pub mod refetch;

pub use monitor::{HeadlessMonitor, probe_capabilities, select_inspector};
