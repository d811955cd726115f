// The mcp module speaks the Model Context Protocol.
// Protocol types and dispatch are transport-agnostic; `transport` is the HTTP surface.

#[path = "protocol.rs"]
pub mod protocol;

#[path = "exchange.rs"]
pub mod exchange;

#[path = "dispatcher.rs"]
pub mod dispatcher;

#[path = "transport/mod.rs"]
pub mod transport;
