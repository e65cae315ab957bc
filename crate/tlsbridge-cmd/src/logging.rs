use env_logger::Builder;
use std::io::Write;

/// Initialize logging.
///
/// Level defaults to WARN, except for the given modules, which log at
/// INFO. The env variable RUST_LOG overrides this.
///
/// Output format can be made systemd-friendly by setting
/// RUST_LOG_FORMAT to SYSTEMD.
pub fn init(info_modules: &[&str]) {
    let mut builder = Builder::new();

    if std::env::var("RUST_LOG_FORMAT").is_ok_and(|format| format == "SYSTEMD") {
        enable_systemd_log_format(&mut builder);
    }

    builder.filter_level(log::LevelFilter::Warn);
    for module in info_modules {
        builder.filter_module(module, log::LevelFilter::Info);
    }

    builder.parse_default_env();
    builder.init();
}

/// Prefix each line with its syslog priority. Time is left out; the
/// journal records it.
fn enable_systemd_log_format(builder: &mut Builder) {
    builder.format(|fmt, record| {
        writeln!(
            fmt,
            "<{}>{}: {}",
            syslog_priority(record.level()),
            record.target(),
            record.args()
        )
    });
}

/// Syslog priority level (RFC 5424) of a log level.
fn syslog_priority(level: log::Level) -> u8 {
    match level {
        log::Level::Error => 3,
        log::Level::Warn => 4,
        log::Level::Info => 5,
        log::Level::Debug | log::Level::Trace => 7,
    }
}
