use snafu::{Backtrace, Snafu};
use store::ResultCode;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Catalog store failure, err:{}", source))]
    Store { source: store::Error },

    #[snafu(display(
        "Catalog operation rejected, code:{:?}, what:{}.\nBacktrace:\n{}",
        code,
        what,
        backtrace
    ))]
    Rejected {
        code: ResultCode,
        what: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Key algebra failure, err:{}", source))]
    KeyAlgebra { source: key_algebra::Error },

    #[snafu(display("Mapping cache failure, err:{}", source))]
    Cache { source: cache::Error },

    #[snafu(display("The operation was canceled before completion"))]
    Canceled,

    #[snafu(display(
        "Undo itself failed terminally for operation {}; its pending-log slot is left for recovery, err:{}",
        operation_id,
        source
    ))]
    UndoFailed {
        operation_id: uuid::Uuid,
        source: Box<Error>,
    },
}

macros::define_result!(Error);

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

impl From<cache::Error> for Error {
    fn from(source: cache::Error) -> Self {
        Error::Cache { source }
    }
}

impl Error {
    /// The (category, code) pair every user-visible error carries, per
    /// spec.md §7.
    pub fn code(&self) -> ResultCode {
        match self {
            Error::Store { source } => source.code(),
            Error::Rejected { code, .. } => *code,
            Error::KeyAlgebra { .. } => ResultCode::InvalidArgument,
            Error::Cache { .. } => ResultCode::InvalidArgument,
            Error::Canceled => ResultCode::Canceled,
            Error::UndoFailed { source, .. } => source.code(),
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
