pub mod catalog;
pub mod config;
pub mod ipc;
pub mod locale;
pub mod preferences;
pub mod types;

pub use catalog::*;
pub use config::*;
pub use ipc::*;
pub use preferences::*;
pub use types::*;
