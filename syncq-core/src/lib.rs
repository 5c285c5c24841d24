pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod service;

#[cfg(test)]
pub mod test_helpers;

pub use codec::QueueEntryCodec;
pub use config::Config;
pub use error::{Error, Result};
