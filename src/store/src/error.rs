use snafu::{Backtrace, Snafu};

use crate::ResultCode;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Lost connection to the catalog store, err:{}.\nBacktrace:\n{}", source, backtrace))]
    Connection {
        source: generic_error::GenericError,
        backtrace: Backtrace,
    },

    #[snafu(display("Catalog transaction failed, err:{}.\nBacktrace:\n{}", source, backtrace))]
    Transaction {
        source: generic_error::GenericError,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to (de)serialize a store row, err:{}.\nBacktrace:\n{}", source, backtrace))]
    Serialization {
        source: generic_error::GenericError,
        backtrace: Backtrace,
    },

    #[snafu(display("Row not found in catalog, what:{}.\nBacktrace:\n{}", what, backtrace))]
    NotFound { what: String, backtrace: Backtrace },

    #[snafu(display("Catalog request conflicted, code:{:?}, what:{}.\nBacktrace:\n{}", code, what, backtrace))]
    Conflict {
        code: ResultCode,
        what: String,
        backtrace: Backtrace,
    },
}

macros::define_result!(Error);

impl Error {
    /// The store's own classification of each variant into a [`ResultCode`],
    /// used by [`crate::StoreResult`] and consumed by the `retry` crate.
    pub fn code(&self) -> ResultCode {
        match self {
            Error::Connection { .. } => ResultCode::StorageUnreachable,
            Error::Transaction { .. } => ResultCode::StorageOperationFailure,
            Error::Serialization { .. } => ResultCode::InvalidArgument,
            Error::NotFound { .. } => ResultCode::ShardMapDoesNotExist,
            Error::Conflict { code, .. } => *code,
        }
    }
}

impl retry::Fault for Error {
    fn fault_class(&self) -> retry::FaultClass {
        if self.code().is_transient() {
            retry::FaultClass::Transient
        } else {
            retry::FaultClass::Terminal
        }
    }
}
