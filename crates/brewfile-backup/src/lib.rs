pub mod app;
pub mod artifact;
pub mod backup;
pub mod config;
pub mod credentials;
pub mod error;
pub mod log_sanitize;
pub mod logging;
pub mod paths;
pub mod process;
pub mod remote;
pub mod state;

pub use error::{Error, ErrorKind, Result};
