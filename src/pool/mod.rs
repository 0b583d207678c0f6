mod connection;
mod executor;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{BackendConnection, ConnectionError};
pub use executor::{classify, ExecutorConfig, MysqlExecutor, SqlExecutor};
