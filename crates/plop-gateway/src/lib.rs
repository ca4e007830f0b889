pub mod connection;
pub mod error;
pub mod fcm;
pub mod offline;
pub mod presence;
pub mod push;
pub mod rate_limit;
pub mod router;
pub mod store;
mod util;

pub use presence::{ConnId, Connection, PresenceRegistry};
pub use router::MessageRouter;
