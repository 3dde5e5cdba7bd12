//! PostgreSQL repositories, one per table. Each wraps a borrowed connection so callers decide
//! whether a group of calls shares a transaction.

pub mod api_keys;
pub mod functions;
pub mod invocations;
pub mod projects;

pub use api_keys::ApiKeys;
pub use functions::Functions;
pub use invocations::Invocations;
pub use projects::Projects;
