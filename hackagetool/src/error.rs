// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

use hackage_security::error::ErrorClass;
use snafu::{Backtrace, Snafu};

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility = "pub(crate)")]
pub(crate) enum Error {
    #[snafu(display("Failed to initialize the logger: {}", source))]
    Logger { source: simplelog::TermLogError },

    #[snafu(display("{}", source))]
    Repository {
        source: hackage_security::error::Error,
        backtrace: Backtrace,
    },
}

impl Error {
    /// 0 is success, 1 a verification failure, 2 a transport failure, and 3
    /// a usage error.
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            Error::Logger { .. } => 3,
            Error::Repository { source, .. } => match source.class() {
                ErrorClass::Verification => 1,
                ErrorClass::Transport => 2,
                ErrorClass::Usage => 3,
            },
        }
    }
}
