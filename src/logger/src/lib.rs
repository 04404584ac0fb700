//! Structured logging for the shard manager, built on the `slog` family.
//!
//! Callers obtain a [`slog::Logger`] however they like (tests typically use
//! [`term_logger`]) and pass it down explicitly; there is no implicit global
//! logger, matching spec.md §9's "no global mutable state" note. The
//! `debug!`/`info!`/`warn!`/`error!` macros re-exported here are `slog`'s own
//! macros, so call sites look like `logger::info!(log, "msg"; "k" => v)`.

use slog::{o, Drain};

pub use slog::{debug, error, info, warn, Logger};

/// Build an async, level-filtered terminal logger.
///
/// This is the logger used by tests and by any binary that does not supply
/// its own drain via [`ShardMapManagerConfig`](../shard_map_manager/index.html).
pub fn term_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}

/// A logger that discards everything, useful as a default in configs that
/// don't care about observability.
pub fn nop_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}
