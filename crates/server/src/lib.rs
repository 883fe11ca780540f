// coedit-server: document rooms, the collaboration channel and autosave.

pub mod api;
pub mod app;
pub mod autosave;
pub mod config;
pub mod cors;
pub mod error;
pub mod events;
pub mod rooms;
pub mod store;
pub mod ws;

pub use app::{build_router, AppState};
pub use config::ServerConfig;
pub use store::{DocumentStore, HttpDocumentStore, MemoryDocumentStore, StoreBackend};
