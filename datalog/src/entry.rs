//! On-flash record layout.
//!
//! Everything on flash is an entry: a one-word header followed by a payload
//! and up to three bytes of implicit padding to the next word boundary. All
//! multi-byte fields are little-endian regardless of the host.

use crate::error::Error;
use crate::{FieldId, Size, SystemTime, TableId};
use alloc::vec;
#[cfg(feature = "defmt")]
use defmt::trace;
use embedded_storage::nor_flash::NorFlash;

/// Identifies the start of every block.
pub const MAGIC: u32 = 0xA78B_E044;

/// Entries are 32-bit word-aligned.
pub const WORD: u32 = 4;

/// Size of [`Header`] on flash.
pub const HEADER_SIZE: u32 = 4;

/// Set while a record is being written, cleared as the final step. A record
/// read back with this bit still set is torn and must be skipped.
pub const FLAG_INVALID: u8 = 0x01;

/// Tag byte of every entry. Values are wire-visible and fixed.
#[derive(strum::FromRepr, strum::Display, Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Kind {
    /// Unused padding
    Pad = 0,
    /// Identifies start of block
    Block = 1,
    /// System boot
    Boot = 2,
    /// Contains RTC value and corresponding system time
    Time = 3,
    /// Qualifies following fields (e.g. name of device)
    Table = 4,
    /// Field identification record
    Field = 5,
    /// Data record
    Data = 6,
    /// Exception information
    Exception = 7,
    /// Map of block sequence numbers
    Map = 8,
    /// Erased flash, never written
    Erased = 0xFF,
}

/// Entry header. Exactly one word in size so it can be written atomically.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Header {
    /// Size of content, excluding this header
    pub size: Size,
    /// Raw kind tag
    pub kind: u8,
    pub flags: u8,
}

impl Header {
    pub fn new(kind: Kind, size: Size, flags: u8) -> Self {
        Self {
            size,
            kind: kind as u8,
            flags,
        }
    }

    pub fn to_bytes(self) -> [u8; HEADER_SIZE as usize] {
        let size = self.size.to_le_bytes();
        [size[0], size[1], self.kind, self.flags]
    }

    pub fn from_bytes(raw: [u8; HEADER_SIZE as usize]) -> Self {
        Self {
            size: Size::from_le_bytes([raw[0], raw[1]]),
            kind: raw[2],
            flags: raw[3],
        }
    }

    /// Erased flash reads back as kind 0xFF; scanning stops here.
    pub fn is_erased(&self) -> bool {
        self.kind == Kind::Erased as u8
    }

    pub fn is_valid(&self) -> bool {
        self.flags & FLAG_INVALID == 0
    }
}

/// Fixed portion of an entry payload.
///
/// Implementations write their wire image into the buffer handed to them.
/// Trailing variable-length content (names, rows, stack words) travels
/// separately; see [`Log::write_record`](crate::Log::write_record).
pub trait Record {
    const KIND: Kind;
    const SIZE: usize;

    fn encode(&self, buf: &mut [u8]);
}

/// Largest fixed payload the engine stages on the stack.
pub(crate) const MAX_RECORD_SIZE: usize = 24;

const _: () = assert!(Exception::SIZE <= MAX_RECORD_SIZE);

/// Written as the first entry in a flash block.
///
/// During initialisation the partition is scanned to determine the read
/// start position, which is the block containing the lowest contiguous
/// sequence number. The write position is recovered from the block with the
/// highest sequence number.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Block {
    pub magic: u32,
    /// Always increments
    pub sequence: u32,
}

impl Record for Block {
    const KIND: Kind = Kind::Block;
    const SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.sequence.to_le_bytes());
    }
}

impl Block {
    pub fn from_bytes(raw: [u8; 8]) -> Self {
        Self {
            magic: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            sequence: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        }
    }
}

/// System boot information.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Boot {
    /// Reset reason as reported by the SoC
    pub reason: u8,
}

impl Record for Boot {
    const KIND: Kind = Kind::Boot;
    const SIZE: usize = 1;

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.reason;
    }
}

/// Written on restart, at midnight and when the RTC clock is updated.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Time {
    pub system_time: SystemTime,
    /// Seconds since epoch
    pub utc: u32,
}

impl Record for Time {
    const KIND: Kind = Kind::Time;
    const SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.system_time.to_le_bytes());
        buf[4..8].copy_from_slice(&self.utc.to_le_bytes());
    }
}

/// A table identifies a data set. The name follows as trailing bytes, no
/// NUL.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Table {
    pub id: TableId,
}

impl Record for Table {
    const KIND: Kind = Kind::Table;
    const SIZE: usize = 2;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.id.to_le_bytes());
    }
}

/// Base type of a field.
#[derive(strum::FromRepr, strum::Display, Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FieldType {
    Unsigned = 0,
    Signed = 1,
    Float = 2,
    Char = 3,
}

/// A field descriptor. The name follows as trailing bytes, no NUL.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Field {
    /// Application-specific identifier, for example a modbus register
    /// number.
    pub id: FieldId,
    pub type_: FieldType,
    /// Variable-length field flag.
    ///
    /// When set, the fixed portion of the row stores the actual length of
    /// the data in bytes (as `u16`); data from all variable fields is stored
    /// sequentially after the fixed portion.
    pub variable: bool,
    /// Size of the field in bytes; element size for variable-length fields.
    pub size: u8,
}

impl Record for Field {
    const KIND: Kind = Kind::Field;
    const SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.id.to_le_bytes());
        buf[2] = (self.type_ as u8) | (u8::from(self.variable) << 7);
        buf[3] = self.size;
    }
}

/// A complete set of values for one table. The row follows as trailing
/// bytes, in the same order and size as the fields.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Data {
    pub system_time: SystemTime,
    /// Identifies which table this data is for
    pub table: TableId,
    pub reserved: u16,
}

impl Record for Data {
    const KIND: Kind = Kind::Data;
    const SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.system_time.to_le_bytes());
        buf[4..6].copy_from_slice(&self.table.to_le_bytes());
        buf[6..8].copy_from_slice(&self.reserved.to_le_bytes());
    }
}

/// CPU fault registers. The faulting stack follows as trailing bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Exception {
    pub cause: u32,
    pub epc1: u32,
    pub epc2: u32,
    pub epc3: u32,
    pub excvaddr: u32,
    pub depc: u32,
}

impl Record for Exception {
    const KIND: Kind = Kind::Exception;
    const SIZE: usize = 24;

    fn encode(&self, buf: &mut [u8]) {
        for (chunk, word) in buf.chunks_exact_mut(4).zip([
            self.cause,
            self.epc1,
            self.epc2,
            self.epc3,
            self.excvaddr,
            self.depc,
        ]) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
    }
}

/// Round `n` up to the next word boundary.
#[inline(always)]
pub(crate) const fn align_up(n: u32) -> u32 {
    (n + (WORD - 1)) & !(WORD - 1)
}

/// Write `bytes` at `offset`, padding both ends out to the word granularity
/// NOR drivers require. Padding bytes are 0xFF: programming all-ones leaves
/// erased flash untouched, so adjacent entries can share a word.
pub(crate) fn write_padded<P: NorFlash>(
    partition: &mut P,
    offset: u32,
    bytes: &[u8],
) -> Result<(), Error> {
    #[cfg(feature = "defmt")]
    trace!("write_padded @{:#08x}: [{}]", offset, bytes.len());

    if bytes.is_empty() {
        return Ok(());
    }

    let front = (offset % WORD) as usize;
    if front == 0 && bytes.len().is_multiple_of(WORD as usize) {
        return partition.write(offset, bytes).map_err(|_| Error::FlashError);
    }

    let mut buf = vec![0xFFu8; align_up((front + bytes.len()) as u32) as usize];
    buf[front..front + bytes.len()].copy_from_slice(bytes);
    partition
        .write(offset - front as u32, &buf)
        .map_err(|_| Error::FlashError)
}
