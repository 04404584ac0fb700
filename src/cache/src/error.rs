use snafu::{Backtrace, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Cache key failed to encode, err:{}.\nBacktrace:\n{}", source, backtrace))]
    KeyEncoding {
        source: key_algebra::Error,
        backtrace: Backtrace,
    },
}

macros::define_result!(Error);
