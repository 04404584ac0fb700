//! A boxed error type used at crate seams that wrap an opaque external
//! failure, so leaf crates don't have to name each other's error types.

pub type GenericError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type GenericResult<T> = std::result::Result<T, GenericError>;
