/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

use log::{Level, SetLoggerError};
use simplelog::SimpleLogger;
use syslog::{BasicLogger, Facility, Formatter3164};

const PORTOD_SYSLOG_NAME: &str = "portod";

#[derive(thiserror::Error, Debug)]
pub(crate) enum LoggingError {
    #[error("unable to install logger: {0}")]
    SetupFailure(SetLoggerError),
}

/// Installs the logging pipeline: a console logger always, syslog in
/// addition when the daemon socket is reachable. `tracing` call sites
/// feed this through its `log` compatibility layer.
pub(crate) fn init(logger_level: Level) -> Result<(), LoggingError> {
    let logger_simple = create_logger_simple(logger_level);

    let formatter = Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: PORTOD_SYSLOG_NAME.into(),
        pid: 0,
    };

    match syslog::unix(formatter) {
        Ok(logger_syslog) => multi_log::MultiLogger::init(
            vec![
                logger_simple,
                Box::new(BasicLogger::new(logger_syslog)),
            ],
            logger_level,
        )
        .map_err(LoggingError::SetupFailure),
        // development machines may not run a syslog daemon
        Err(_) => multi_log::MultiLogger::init(
            vec![logger_simple],
            logger_level,
        )
        .map_err(LoggingError::SetupFailure),
    }
}

fn create_logger_simple(logger_level: Level) -> Box<SimpleLogger> {
    SimpleLogger::new(
        logger_level.to_level_filter(),
        simplelog::Config::default(),
    )
}
