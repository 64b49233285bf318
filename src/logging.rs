// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Logging setup. Mutation, connection, and exception-path events all go
//! through the `log` facade; this module only wires up where they land.

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initializes the global logger from a level string ("trace".."error").
/// Call once, at process start; a second call is a programming error, not
/// a recoverable one, so it panics like `env_logger` itself does.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let level = config
        .level
        .parse::<log::LevelFilter>()
        .map_err(|_| Error::Config(format!("invalid log level: {}", config.level)))?;

    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .try_init()
        .map_err(|err| Error::Config(err.to_string()))?;

    if config.file.is_some() {
        log::warn!(
            "logging.file is set to {:?} but this build only logs to stderr; \
             point a log shipper at the process's stderr stream to get rotation",
            config.file
        );
    }
    Ok(())
}
