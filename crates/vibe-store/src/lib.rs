pub mod database;
pub mod error;
pub mod rooms;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use rooms::{RoomListing, RoomRecord, RoomRepo};
