// MIT License - Copyright (c) 2026 Peter Wright
// Connection, command exchange and name discovery

pub mod command;
pub mod connection;
pub mod discovery;

use std::sync::Arc;

use tokio::sync::Mutex;

pub use connection::Connection;

/// The connection as shared between the listener, the command session and
/// discovery.
pub type SharedConnection<S> = Arc<Mutex<Connection<S>>>;

/// Wrap a connection for sharing.
pub fn shared<S>(connection: Connection<S>) -> SharedConnection<S> {
    Arc::new(Mutex::new(connection))
}
