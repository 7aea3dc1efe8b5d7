use log::LevelFilter;

/// Maps the `-v` count to a log level: errors only by default, then
/// warnings, info, debug and finally trace.
pub fn level_for(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        3 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Installs the process logger. `RUST_LOG` still overrides the level.
pub fn init(verbose: u8) {
    env_logger::Builder::new()
        .filter_level(level_for(verbose))
        .parse_default_env()
        .format_timestamp_micros()
        .init();
}
