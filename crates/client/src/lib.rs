// coedit-client: real-time collaboration session engine.

pub mod channel;
pub mod chat;
pub mod config;
pub mod cue;
pub mod delta;
pub mod directory;
pub mod error;
pub mod membership;
pub mod presence;
pub mod session;
pub mod transport;

pub use channel::{Channel, ChannelEvent, ChannelMultiplexer};
pub use config::{ClientConfig, LocalUser, ReconnectPolicy};
pub use error::{ChannelError, SessionError};
pub use session::{CollabSession, SessionView};
