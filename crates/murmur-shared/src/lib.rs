//! # murmur-shared
//!
//! Types shared by the murmur store and server: identifier newtypes, the
//! domain enums persisted in the database, and the JSON event protocol
//! spoken over chat WebSockets.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
