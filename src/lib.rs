pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod handle;
pub mod message_log;
pub mod models;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod send;
pub mod session;
pub mod timer;

pub use client::{connect, Connection};
pub use config::{Config, SessionConfig};
pub use error::{Result, SessionError};
pub use handle::{spawn_session, SessionHandle};
pub use models::{DeliveryState, Message, MessageId};
pub use session::{Session, SessionSnapshot, SessionState};
