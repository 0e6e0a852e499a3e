mod auth_cache;
mod auth_repo;
mod url_repo;

pub use auth_cache::AuthCache;
pub use auth_repo::*;
pub use url_repo::*;
