// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Library error type

use std::fmt::Display;

use crate::frame::ExceptionResponse;

/// A specialized [Result] type for server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Server errors.
#[derive(Debug)]
pub enum Error {
    /// Modbus exception produced while servicing a request.
    Exception(ExceptionResponse),

    /// General I/O error.
    Io(std::io::Error),

    /// Configuration could not be loaded or was malformed.
    Config(String),

    /// Snapshot persistence failed; the in-memory datastore is unaffected.
    Persistence(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exception(rsp) => rsp.fmt(f),
            Self::Io(io) => io.fmt(f),
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Persistence(msg) => write!(f, "persistence error: {msg}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<ExceptionResponse> for Error {
    fn from(value: ExceptionResponse) -> Self {
        Error::Exception(value)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(value: serde_yaml::Error) -> Self {
        Error::Config(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Persistence(value.to_string())
    }
}
