use snafu::{Backtrace, Snafu};
use store::ResultCode;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Operation engine failure, err:{}", source))]
    Operation { source: operations::Error },

    #[snafu(display("Catalog store failure, err:{}", source))]
    Store { source: store::Error },

    #[snafu(display("Key algebra failure, err:{}", source))]
    KeyAlgebra { source: key_algebra::Error },

    #[snafu(display(
        "Diff token {} is unknown or was already resolved.\nBacktrace:\n{}",
        token,
        backtrace
    ))]
    UnknownToken {
        token: uuid::Uuid,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Shard map {} does not exist.\nBacktrace:\n{}",
        shard_map_id,
        backtrace
    ))]
    UnknownShardMap {
        shard_map_id: uuid::Uuid,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Pending-log row for operation {} names an unrecognized operation code {:?}.\nBacktrace:\n{}",
        operation_id,
        code,
        backtrace
    ))]
    UnknownOperationCode {
        operation_id: uuid::Uuid,
        code: String,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Pending-log row for operation {} could not be parsed back into its intent, err:{}.\nBacktrace:\n{}",
        operation_id,
        source,
        backtrace
    ))]
    IntentDeserialization {
        operation_id: uuid::Uuid,
        source: serde_json::Error,
        backtrace: Backtrace,
    },
}

macros::define_result!(Error);

impl From<operations::Error> for Error {
    fn from(source: operations::Error) -> Self {
        Error::Operation { source }
    }
}

impl From<store::Error> for Error {
    fn from(source: store::Error) -> Self {
        Error::Store { source }
    }
}

impl From<key_algebra::Error> for Error {
    fn from(source: key_algebra::Error) -> Self {
        Error::KeyAlgebra { source }
    }
}

impl Error {
    /// The (category, code) pair every user-visible error carries, per
    /// spec.md §7.
    pub fn code(&self) -> ResultCode {
        match self {
            Error::Operation { source } => source.code(),
            Error::Store { source } => source.code(),
            Error::KeyAlgebra { .. } => ResultCode::InvalidArgument,
            Error::UnknownToken { .. } => ResultCode::InvalidArgument,
            Error::UnknownShardMap { .. } => ResultCode::ShardMapDoesNotExist,
            Error::UnknownOperationCode { .. } => ResultCode::InvalidArgument,
            Error::IntentDeserialization { .. } => ResultCode::InvalidArgument,
        }
    }

    pub fn category(&self) -> store::ErrorCategory {
        store::ErrorCategory::Recovery
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
