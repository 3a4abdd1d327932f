// store

mod cache_store;
mod session_token_repo;

pub use cache_store::*;
pub use session_token_repo::*;

// repo

mod auth_repo;

pub use auth_repo::*;
