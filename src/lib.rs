pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod store;
pub mod utils;

pub use config::SignalingConfig;
pub use error::{Error, Result};
pub use session::{ConnectionSession, RoomPaths, SessionEvent};
pub use signaling::RoomManager;
pub use store::{MemoryStore, SignalingStore};
