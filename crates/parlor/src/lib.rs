//! Client SDK for the Parlor chat platform.
//!
//! All REST operations funnel through one request pipeline (rate limiting,
//! bounded retry with backoff, typed error mapping) and share best-effort
//! channel/user caches. Realtime events arrive over a separate streaming
//! session that reconnects on its own.
//!
//! ```no_run
//! use parlor::{Client, ClientConfig};
//!
//! # async fn demo() -> parlor::Result<()> {
//! let client = Client::connect(ClientConfig::new(
//!     "https://chat.example.com",
//!     "parlor_server_token",
//! ))
//! .await?;
//!
//! let channels = client.get_channels(false).await?;
//! client.send_message(channels[0].id, "Hello!").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod http;
mod limiter;
pub mod logging;
pub mod models;
pub mod transport;

pub use client::{Client, MessageQuery};
pub use config::ClientConfig;
pub use errors::{Error, Resource, Result};
pub use gateway::{Event, EventKind, HandlerHandle};
pub use models::{
    Attachment, Channel, ChannelKind, Member, Message, Permission, Presence, Role, ServerInfo,
    User,
};
pub use transport::AuthMode;
