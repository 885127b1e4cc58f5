pub mod connection;
pub mod port;
pub mod proto;
pub mod util;

pub use connection::{ConnectOptions, ConnectionManager, ConnectionState, Event, ReconnectPolicy};
pub use proto::{AlertEvent, Message, Score};
