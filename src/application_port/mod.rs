mod auth_service;
mod rpc;

pub use auth_service::*;
pub use rpc::*;
