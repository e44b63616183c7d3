pub mod broadcaster;
pub mod handler;
pub mod messages;

pub use broadcaster::Broadcaster;
pub use handler::{websocket_handler, WsState};
pub use messages::{ClientMessage, WsMessage};
