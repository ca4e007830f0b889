pub mod api;
pub mod message;

pub use message::{Message, MessageType, Payload};
