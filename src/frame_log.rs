//! Append-only local frame log
//!
//! Nodes without an upload path keep a CSV line per frame on their storage
//! card (see [`crate::LogLine`] for the format).

/// Frame log errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameLogError {
    /// Storage could not be opened
    Unavailable,
    /// Line could not be written
    WriteFailed,
}

impl core::fmt::Display for FrameLogError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FrameLogError::Unavailable => write!(f, "frame log storage unavailable"),
            FrameLogError::WriteFailed => write!(f, "frame log write failed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FrameLogError {}

/// Append-only line sink
pub trait FrameLog {
    /// Appends `line` followed by a line break
    fn append(&mut self, line: &str) -> Result<(), FrameLogError>;
}

impl<L: FrameLog + ?Sized> FrameLog for &mut L {
    fn append(&mut self, line: &str) -> Result<(), FrameLogError> {
        (**self).append(line)
    }
}

/// Frame log of a node without storage
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFrameLog;

impl FrameLog for NoFrameLog {
    fn append(&mut self, _line: &str) -> Result<(), FrameLogError> {
        Err(FrameLogError::Unavailable)
    }
}

#[cfg(feature = "std")]
pub use file::FileFrameLog;

#[cfg(feature = "std")]
mod file {
    use std::fs::{File, OpenOptions};
    use std::io::Write;
    use std::path::Path;

    use log::log;

    use super::{FrameLog, FrameLogError};

    /// Frame log appending to a file, created if missing
    pub struct FileFrameLog {
        file: File,
    }

    impl FileFrameLog {
        pub fn open(path: impl AsRef<Path>) -> Result<Self, FrameLogError> {
            let path = path.as_ref();
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Ok(FileFrameLog { file }),
                Err(error) => {
                    log!(log::Level::Error, "Cannot open frame log {}: {}", path.display(), error);
                    Err(FrameLogError::Unavailable)
                }
            }
        }
    }

    impl FrameLog for FileFrameLog {
        fn append(&mut self, line: &str) -> Result<(), FrameLogError> {
            writeln!(self.file, "{}", line).map_err(|_| FrameLogError::WriteFailed)
        }
    }
}

/// Frame log double keeping lines in memory
#[cfg(all(test, feature = "std"))]
#[derive(Default)]
pub(crate) struct MemoryFrameLog {
    pub lines: Vec<String>,
}

#[cfg(all(test, feature = "std"))]
impl FrameLog for MemoryFrameLog {
    fn append(&mut self, line: &str) -> Result<(), FrameLogError> {
        self.lines.push(line.to_string());
        Ok(())
    }
}
