//! PostgreSQL driver.
//!
//! - [`PostgresSource`]: catalog queries against `pg_catalog` and
//!   `information_schema`, full-table reads over a deadpool pool

mod reader;

pub use reader::PostgresSource;
