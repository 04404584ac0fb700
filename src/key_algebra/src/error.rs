use snafu::{Backtrace, Snafu};

use crate::KeyType;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display(
        "Key is already the max sentinel, no successor exists, key_type:{:?}.\nBacktrace:\n{}",
        key_type,
        backtrace
    ))]
    UnsupportedNextKey {
        key_type: KeyType,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Key type mismatch, expected:{:?}, found:{:?}.\nBacktrace:\n{}",
        expected,
        found,
        backtrace
    ))]
    TypeMismatch {
        expected: KeyType,
        found: KeyType,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "The max sentinel has no raw byte form, key_type:{:?}.\nBacktrace:\n{}",
        key_type,
        backtrace
    ))]
    MaxSentinelHasNoRawForm {
        key_type: KeyType,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Invalid raw bytes for key_type:{:?}, len:{}.\nBacktrace:\n{}",
        key_type,
        len,
        backtrace
    ))]
    InvalidRawBytes {
        key_type: KeyType,
        len: usize,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Invalid shard range, low:{:?}, high:{:?}.\nBacktrace:\n{}",
        low,
        high,
        backtrace
    ))]
    InvalidRange {
        low: String,
        high: String,
        backtrace: Backtrace,
    },
}

macros::define_result!(Error);
