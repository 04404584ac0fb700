use snafu::{Backtrace, Snafu};
use store::{ErrorCategory, ResultCode};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Operation engine failure, err:{}", source))]
    Operation { source: operations::Error },

    #[snafu(display("Catalog store failure, err:{}", source))]
    Store { source: store::Error },

    #[snafu(display("Recovery failure, err:{}", source))]
    Recovery { source: recovery::Error },

    #[snafu(display("Mapping cache failure, err:{}", source))]
    Cache { source: cache::Error },

    #[snafu(display("Key algebra failure, err:{}", source))]
    KeyAlgebra { source: key_algebra::Error },

    #[snafu(display("Shard map {} does not exist.\nBacktrace:\n{}", name, backtrace))]
    ShardMapNotFound { name: String, backtrace: Backtrace },

    #[snafu(display("No mapping covers the requested key, what:{}.\nBacktrace:\n{}", what, backtrace))]
    MappingNotFoundForKey { what: String, backtrace: Backtrace },

    #[snafu(display("The mapping covering the requested key is offline, what:{}.\nBacktrace:\n{}", what, backtrace))]
    MappingIsOffline { what: String, backtrace: Backtrace },

    #[snafu(display(
        "The shard map manager this handle was obtained from has been dropped.\nBacktrace:\n{}",
        backtrace
    ))]
    ShardMapManagerClosed { backtrace: Backtrace },

    #[snafu(display("Invalid shard map manager configuration, what:{}.\nBacktrace:\n{}", what, backtrace))]
    InvalidConfig { what: String, backtrace: Backtrace },
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

impl From<recovery::Error> for Error {
    fn from(source: recovery::Error) -> Self {
        Error::Recovery { source }
    }
}

impl From<cache::Error> for Error {
    fn from(source: cache::Error) -> Self {
        Error::Cache { source }
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
            Error::Recovery { source } => source.code(),
            Error::Cache { .. } => ResultCode::InvalidArgument,
            Error::KeyAlgebra { .. } => ResultCode::InvalidArgument,
            Error::ShardMapNotFound { .. } => ResultCode::ShardMapDoesNotExist,
            Error::MappingNotFoundForKey { .. } => ResultCode::MappingNotFoundForKey,
            Error::MappingIsOffline { .. } => ResultCode::MappingIsOffline,
            Error::ShardMapManagerClosed { .. } => ResultCode::InvalidArgument,
            Error::InvalidConfig { .. } => ResultCode::InvalidArgument,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Operation { .. }
            | Error::ShardMapNotFound { .. }
            | Error::MappingNotFoundForKey { .. }
            | Error::MappingIsOffline { .. } => ErrorCategory::ShardMap,
            Error::Recovery { .. } => ErrorCategory::Recovery,
            Error::ShardMapManagerClosed { .. } | Error::InvalidConfig { .. } => ErrorCategory::ShardMapManager,
            Error::Store { .. } | Error::Cache { .. } | Error::KeyAlgebra { .. } => ErrorCategory::General,
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
