#![doc = include_str!("../README.md")]

pub mod client;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod feedback;
pub mod gateway;
pub mod identity;
pub mod payload;
pub mod tls;
pub mod transport;

pub use client::{Client, ClientConfig, ClientConfigBuilder};
pub use endpoint::Mode;
pub use error::{Error, Result};
pub use gateway::{DisconnectReason, GatewaySession};
pub use identity::Identity;
pub use payload::Payload;
pub use tls::TlsCredentials;
pub use transport::ApsStream;
