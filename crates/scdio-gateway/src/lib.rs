pub mod chat;
pub mod connection;
pub mod dispatcher;

pub use chat::ChatError;
pub use connection::{GatewayContext, handle_connection};
pub use dispatcher::Dispatcher;
