// tkv-common - Wire protocol for the tagged binary key-value/pub-sub service
//
// This crate holds everything that is pure data: request encoding, response
// decoding, push events and the shared integer width. It performs no I/O.

pub mod error;
pub mod event;
pub mod kinds;
pub mod request;
pub mod response;
pub mod width;

// Re-export for convenience
pub use error::*;
pub use event::*;
pub use kinds::*;
pub use request::*;
pub use response::*;
pub use width::*;
