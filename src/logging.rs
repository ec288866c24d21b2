use std::io::Write;

/// Installs the `<local time> - <level> - <message>` logger. The default level is
/// info; `RUST_LOG` takes precedence when set.
pub fn init() {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    // A second init (tests, embedding) keeps the first logger.
    let _ = builder.try_init();
}
