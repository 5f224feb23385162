//! Byte stream over the live span, for replication to an archiver.

use crate::error::Error;
use crate::log::Log;
use crate::platform::Platform;
#[cfg(feature = "defmt")]
use defmt::trace;

/// Reference point for [`Reader::seek_from`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SeekOrigin {
    Start,
    Current,
    End,
}

/// Streams the raw contents of a log from a starting block sequence.
///
/// The server only needs the basic block format to identify sequence
/// numbers; it periodically requests the next block and this stream serves
/// it.
///
/// There is a race condition whereby the first block is erased whilst being
/// transferred. The receiver either calculates a hash before sending the
/// block and discards it on mismatch, or re-reads the log's start sequence
/// after the transfer; the log itself does not lock.
pub struct Reader<'a, P: Platform> {
    log: &'a mut Log<P>,
    start_block: u32,
    /// Bound span in bytes; `None` streams to the live end, trailing partial
    /// block included
    size: Option<u32>,
    pos: u32,
    done: bool,
}

impl<'a, P: Platform> Reader<'a, P> {
    /// Stream from `start_block` to the live end of the log.
    pub fn new(log: &'a mut Log<P>, start_block: u32) -> Self {
        Self {
            log,
            start_block,
            size: None,
            pos: 0,
            done: false,
        }
    }

    /// Stream exactly `block_count` blocks from `start_block`.
    pub fn with_block_count(log: &'a mut Log<P>, start_block: u32, block_count: u32) -> Self {
        let size = block_count * log.block_size();
        Self {
            log,
            start_block,
            size: Some(size),
            pos: 0,
            done: false,
        }
    }

    fn bound(&self) -> u32 {
        match self.size {
            Some(size) => size,
            // Live span relative to our start block, including the partial
            // write block
            None => {
                self.log.end_sequence().saturating_sub(self.start_block) * self.log.block_size()
                    + self.log.write_offset() % self.log.block_size()
            }
        }
    }

    /// Read up to `buf.len()` bytes at the current position, without
    /// advancing it; the consumer advances with [`Reader::seek_from`] once
    /// the bytes are safely away.
    pub fn read_memory_block(&mut self, buf: &mut [u8]) -> usize {
        if self.done || buf.is_empty() {
            return 0;
        }

        let block_size = self.log.block_size();
        let block = self.start_block + self.pos / block_size;
        let offset = self.pos % block_size;

        let to_read = buf.len().min(self.bound().saturating_sub(self.pos) as usize);

        #[cfg(feature = "defmt")]
        trace!(
            "read block {}, offset {}, count {} (pos {})",
            block, offset, to_read, self.pos
        );

        match self.log.read(block, offset, &mut buf[..to_read]) {
            Ok(0) | Err(_) => {
                self.done = true;
                0
            }
            Ok(count) => count,
        }
    }

    /// Reposition the stream. Returns the new position, or an error if the
    /// target lies outside the bound span; landing exactly on the end marks
    /// the stream finished.
    pub fn seek_from(&mut self, offset: i32, origin: SeekOrigin) -> Result<u32, Error> {
        let size = self.bound();

        #[cfg(feature = "defmt")]
        trace!(
            "seek offset {}, origin {} (pos {}, size {})",
            offset, origin as u8, self.pos, size
        );

        let base = match origin {
            SeekOrigin::Start => 0,
            SeekOrigin::Current => i64::from(self.pos),
            SeekOrigin::End => i64::from(size),
        };
        let new_pos = base + i64::from(offset);

        if new_pos < 0 || new_pos > i64::from(size) {
            return Err(Error::SeekOutOfRange);
        }
        if new_pos == i64::from(size) {
            self.done = true;
        }

        self.pos = new_pos as u32;
        Ok(self.pos)
    }

    pub fn is_finished(&self) -> bool {
        self.done
    }

    /// Log streams are raw binary.
    pub fn mime_type(&self) -> &'static str {
        "application/octet-stream"
    }
}
