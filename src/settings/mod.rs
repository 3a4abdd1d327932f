//! Settings come from a TOML file (see `settings/dev.toml`), with the JWT lifetimes
//! overridable through `ACCESS_EXPIRES_IN` / `REFRESH_EXPIRES_IN` and the signing secrets
//! read from the environment only.

mod cli;
pub use clap::Parser;
pub use cli::*;

mod settings;
pub use settings::*;
