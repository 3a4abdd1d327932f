//! Process-local backends selected with `backend = "memory"`; also the fakes used in tests.

mod memory_auth_repo;
mod memory_bus;
mod memory_cache_store;
mod memory_session_token_repo;

pub use memory_auth_repo::*;
pub use memory_bus::*;
pub use memory_cache_store::*;
pub use memory_session_token_repo::*;
