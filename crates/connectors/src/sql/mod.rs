pub mod dialect;
pub mod duckdb;
pub mod keyset;
pub mod mssql;
pub mod postgres;
