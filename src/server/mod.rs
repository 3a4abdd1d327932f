mod auth_node;
mod event_consumer_impl;
mod event_publisher_impl;
mod gateway;
mod port;
mod rpc_client;
mod rpc_server;

pub use auth_node::*;
pub use event_consumer_impl::*;
pub use event_publisher_impl::*;
pub use gateway::*;
pub use port::*;
pub use rpc_client::*;
pub use rpc_server::*;
