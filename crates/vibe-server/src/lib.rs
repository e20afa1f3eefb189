pub mod activity;
pub mod connection;
pub mod presence;
pub mod registry;
pub mod room;
pub mod server;
pub mod session;
pub mod ws;

#[cfg(test)]
mod test_support;

pub use connection::{ConnectionHandle, SendError};
pub use registry::RoomRegistry;
pub use room::{Room, RoomSummary, RouteOutcome, SlotToken};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
