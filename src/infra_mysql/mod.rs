mod auth_repo_mysql;
mod session_token_repo_mysql;

pub use auth_repo_mysql::*;
pub use session_token_repo_mysql::*;

mod util;

pub use util::connect_pool;
