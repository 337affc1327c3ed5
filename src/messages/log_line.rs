//! CSV rendering of a frame for the local append-only log
//!
//! `version,network_id,sender_id,origin_id,sequence_id,battery_level,timestamp,payload[0..N-1]`
//!
//! Version and battery level keep the wire's hundredths precision (`1.00`, `4.12`).
//! The line is built in a fixed buffer so it can be produced without an allocator.

use core::fmt::Write;

use super::SensorFrame;

/// Longest possible line: two fixed-point fields, five integers, ten i32 values and commas
pub const LOG_LINE_CAPACITY: usize = 200;

/// A rendered log line held in a stack buffer
pub struct LogLine {
    buffer: [u8; LOG_LINE_CAPACITY],
    length: usize,
}

impl LogLine {
    /// Renders `frame` as one CSV record (without line terminator)
    pub fn from_frame(frame: &SensorFrame) -> Self {
        let mut line = LogLine {
            buffer: [0u8; LOG_LINE_CAPACITY],
            length: 0,
        };
        // The capacity covers the widest frame, so writing cannot fail
        let _ = line.write_frame(frame);
        line
    }

    fn write_frame(&mut self, frame: &SensorFrame) -> core::fmt::Result {
        write_hundredths(self, frame.protocol_version)?;
        write!(
            self,
            ",{},{},{},{},",
            frame.network_id, frame.sender_id, frame.origin_id, frame.sequence_id
        )?;
        write_hundredths(self, frame.battery_level)?;
        write!(self, ",{}", frame.timestamp)?;
        for value in frame.payload.iter() {
            write!(self, ",{}", value)?;
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        // Only complete `str` fragments are ever copied into the buffer
        core::str::from_utf8(&self.buffer[..self.length]).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl Write for LogLine {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let end = self.length + s.len();
        if end > LOG_LINE_CAPACITY {
            return Err(core::fmt::Error);
        }
        self.buffer[self.length..end].copy_from_slice(s.as_bytes());
        self.length = end;
        Ok(())
    }
}

impl core::fmt::Display for LogLine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn write_hundredths<W: Write>(writer: &mut W, value: u16) -> core::fmt::Result {
    write!(writer, "{}.{:02}", value / 100, value % 100)
}
