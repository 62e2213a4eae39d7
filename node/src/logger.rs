use std::path::Path;

use anyhow::{Context, Result};
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

const LOG_FILE: &str = "lumino_node.log";

/// Wire up the log sinks: colored stderr for the operator plus a plain
/// `lumino_node.log` in the data directory.
pub fn setup(data_dir: &Path, level: LevelFilter) -> Result<()> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;

    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Magenta)
        .trace(Color::BrightBlack);

    let stderr_dispatch = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} - {} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.target(),
                colors.color(record.level()),
                message
            ))
        })
        .chain(std::io::stderr());

    let file_dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} - {} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.target(),
                record.level(),
                message
            ))
        })
        .chain(fern::log_file(data_dir.join(LOG_FILE)).context("opening log file")?);

    fern::Dispatch::new()
        .level(level)
        // reqwest and hyper are chatty at debug level; keep the node's own
        // modules in the foreground.
        .level_for("hyper", LevelFilter::Warn)
        .level_for("reqwest", LevelFilter::Warn)
        .chain(stderr_dispatch)
        .chain(file_dispatch)
        .apply()
        .context("installing logger")?;

    Ok(())
}
