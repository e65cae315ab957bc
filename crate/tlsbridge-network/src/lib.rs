//! TLS message bridge between two processes.
//!
//! A [Bridge] is either a server, which accepts peers on a listening
//! socket, or a client, which dials a remote address and redials it
//! whenever the connection is lost. Either way, the application only
//! ever calls [Bridge::send] and [Bridge::receive]; background tasks
//! take care of connecting, encoding and decoding.
//!
//! - `security`: TLS credentials and trust anchors.
//! - `transport`: TLS listener, dialer and connections.
//! - `codec`: envelope encoding over a connection.
//! - `bridge`: the [Bridge] handle and its background loops.
//! - `config`: TOML description of a bridge.

mod acceptor;
pub mod async_utils;
mod bridge;
pub mod codec;
pub mod config;
mod current;
mod error;
pub mod hostport;
pub mod metrics;
mod relay;
pub mod security;
mod session;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;

pub use bridge::{
    AcceptorState, Bridge, ClientOptions, ConnectionState, DIAL_TIMEOUT, QUEUE_CAPACITY,
    RECONNECT_DELAY, RETRY_DELAY, Role,
};
pub use error::{BridgeError, TransportError};
pub use security::{ServerCredentials, TrustAnchors};
pub use tlsbridge_types::{Content, Envelope, Registry, RegistryError, Shape};
