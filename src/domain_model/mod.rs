mod rpc;
mod token;
mod user;

pub use rpc::*;
pub use token::*;
pub use user::*;
