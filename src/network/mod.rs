//! Peer-to-peer networking
//!
//! JSON messages over framed channels, one session per connection, and the
//! client/server façade that queries, broadcasts, gossips and syncs across
//! every connected node.

pub mod channel;
pub mod client;
pub mod handler;
pub mod message;
pub mod peer;
pub mod server;

pub use channel::{memory_pair, Channel, Connector, TcpConnector};
pub use client::{plurality, Client};
pub use handler::NodeHandler;
pub use message::{Message, Request, Response, ResponseBody, ResponseKind};
pub use peer::{Peer, RequestHandler};
pub use server::Server;
