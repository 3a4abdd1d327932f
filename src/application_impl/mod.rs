mod auth_guard;
mod auth_rpc_handler;
mod auth_service_impl;
mod dispatcher;
mod jwt_codec;
mod password_hasher;

pub use auth_guard::*;
pub use auth_rpc_handler::*;
pub use auth_service_impl::*;
pub use dispatcher::*;
pub use jwt_codec::*;
pub use password_hasher::*;
