//! Logger setup for the command line tool
//!
//! Records go to stderr through `env_logger` and, when a log file is given,
//! to that file as well. `RUST_LOG` overrides the level picked from `-v`.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use log::LevelFilter;

use crate::error::{PatchError, PatchResult};

/// Writes every record to stderr and a log file
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Level for a `-v` count: 0 info, 1 debug, 2 and more trace
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the global logger
///
/// # Arguments
/// * `verbosity` - Number of `-v` flags
/// * `log_file` - Optional file that receives a copy of every record
///
/// # Returns
/// An error if the log file cannot be created or a logger is already set
pub fn init(verbosity: u8, log_file: Option<&Path>) -> PatchResult<()> {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level_for(verbosity))
        .parse_default_env()
        .format(|buf, record| writeln!(buf, "[{}] {}: {}", record.level(), record.target(), record.args()));

    if let Some(path) = log_file {
        let file = File::create(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
    }

    builder
        .try_init()
        .map_err(|e| PatchError::InvalidConfig(format!("logger already initialized: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(level_for(0), LevelFilter::Info);
        assert_eq!(level_for(1), LevelFilter::Debug);
        assert_eq!(level_for(5), LevelFilter::Trace);
    }
}
