//! Log setup. The terminal gets coloured levels, the optional log file gets
//! the same lines without escape codes.

use crate::config::LoggingConfig;

const fn level_color(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "31",
        log::Level::Warn => "33",
        log::Level::Info => "32",
        log::Level::Debug => "34",
        log::Level::Trace => "36",
    }
}

fn timestamp() -> chrono::format::DelayedFormat<chrono::format::StrftimeItems<'static>> {
    chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S%.3f]")
}

pub fn setup_logging(conf: &LoggingConfig) -> Result<(), String> {
    let mut logger = fern::Dispatch::new().level(conf.level);

    if conf.log_to_stdout {
        let stdout = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{}[{}][\x1b[{}m{}\x1b[0m] {}",
                    timestamp(),
                    record.target(),
                    level_color(record.level()),
                    record.level(),
                    message
                ));
            })
            .chain(std::io::stdout());
        logger = logger.chain(stdout);
    }

    if let Some(log_file) = &conf.log_file {
        let file = fern::log_file(log_file)
            .map_err(|e| format!("Error while opening log file {log_file:?}: {e}"))?;
        let file = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{}[{}][{}] {}",
                    timestamp(),
                    record.target(),
                    record.level(),
                    message
                ));
            })
            .chain(file);
        logger = logger.chain(file);
    }

    logger
        .apply()
        .map_err(|e| format!("Error while setting up logger: {e}"))
}
