mod client;
mod commands;
mod config;
mod diff;
mod driver;
mod error;
mod logger;
pub mod protocol;
mod retry;
mod scheduler;
pub mod transport;
mod types;

pub use client::{ClimateClientBuilder, Session};
pub use commands::{CommandQueue, DeviceStateCache, translate_type_command};
pub use config::{Config, Timing};
pub use driver::{ClimateClient, TokioScheduler};
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use scheduler::{Deferred, Scheduler};
pub use transport::{Connection, TcpConnection, TokioTransport, Transport};
pub use types::*;
