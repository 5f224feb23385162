#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use datalog::Clock;
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

// Small sectors keep the block maths visible in assertions
pub const SECTOR_SIZE: usize = 16;
pub const WORD_SIZE: usize = 4;
/// Four sectors per log block
pub const BLOCK_SIZE: usize = SECTOR_SIZE * 4;
pub const HEADER_SIZE: usize = 4;
pub const BLOCK_START_SIZE: usize = 12;
pub const MAGIC: u32 = 0xA78B_E044;

/// What the fixed mock clock makes of `system_time`
pub const SYSTEM_TIME: u32 = MICROS / 1000;
pub const MICROS: u32 = 65_536;
pub const UTC: u32 = 0x20;
pub const RESET_REASON: u8 = 1;

#[derive(Default)]
pub struct Flash {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    /// Clear the fault after it has fired once
    pub transient: bool,
    pub operations: Vec<Operation>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

impl Flash {
    pub fn new(blocks: usize) -> Self {
        Self {
            buf: vec![0xffu8; BLOCK_SIZE * blocks],
            fail_after_operation: usize::MAX,
            ..Default::default()
        }
    }

    pub fn new_with_fault(blocks: usize, fail_after_operation: usize) -> Self {
        Self {
            buf: vec![0xffu8; BLOCK_SIZE * blocks],
            fail_after_operation,
            ..Default::default()
        }
    }

    /// Fail a single operation, then behave again. Lets a test interrupt one
    /// write while the log stays borrowed.
    pub fn new_with_transient_fault(blocks: usize, fail_after_operation: usize) -> Self {
        Self {
            buf: vec![0xffu8; BLOCK_SIZE * blocks],
            fail_after_operation,
            transient: true,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
    }

    fn faulted(&mut self) -> bool {
        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            if self.transient {
                self.fail_after_operation = usize::MAX;
            }
            return true;
        }
        false
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl ErrorType for Flash {
    type Error = FlashError;
}

impl ReadNorFlash for Flash {
    const READ_SIZE: usize = WORD_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as _));

        println!(
            "    flash: read:  0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );
        if self.faulted() {
            return Err(FlashError);
        }
        self.operations.push(Operation::Read {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl NorFlash for Flash {
    const WRITE_SIZE: usize = WORD_SIZE;

    const ERASE_SIZE: usize = SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as _));

        println!(
            "    flash: erase: {from:04X} - {to:04X} #{:>2}",
            self.operations.len()
        );

        if self.faulted() {
            return Err(FlashError);
        }

        self.operations.push(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        });

        for addr in from..to {
            self.buf[addr as usize] = 0xff;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE as _));

        println!(
            "    flash: write: 0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );

        if self.faulted() {
            return Err(FlashError);
        }
        assert!(!bytes.is_empty());

        self.operations.push(Operation::Write {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        for (i, &val) in bytes.iter().enumerate() {
            // bits can only flip from 1 to 0 without an erase
            self.buf[offset + i] &= val;
        }
        Ok(())
    }
}

impl Clock for Flash {
    fn micros() -> u32 {
        MICROS
    }

    fn utc() -> u32 {
        UTC
    }

    fn reset_reason() -> u8 {
        RESET_REASON
    }
}

impl Clock for &mut Flash {
    fn micros() -> u32 {
        Flash::micros()
    }

    fn utc() -> u32 {
        Flash::utc()
    }

    fn reset_reason() -> u8 {
        Flash::reset_reason()
    }
}

/// Wire image of one committed entry, implicit padding included
pub fn entry_bytes(kind: u8, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut raw = Vec::new();
    raw.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    raw.push(kind);
    raw.push(flags);
    raw.extend_from_slice(payload);
    while !raw.len().is_multiple_of(WORD_SIZE) {
        raw.push(0xFF);
    }
    raw
}

/// Wire image of a block record; the invalid bit stays set for this kind
pub fn block_start(sequence: u32) -> Vec<u8> {
    let mut payload = MAGIC.to_le_bytes().to_vec();
    payload.extend_from_slice(&sequence.to_le_bytes());
    entry_bytes(1, 0xFF, &payload)
}

/// Wire image of a pad record: fully committed header, skipped content
pub fn pad_bytes(size: u16) -> Vec<u8> {
    let mut raw = vec![0u8; HEADER_SIZE];
    raw[..2].copy_from_slice(&size.to_le_bytes());
    raw.extend(std::iter::repeat_n(0xFFu8, size as usize));
    raw
}

/// Plant a block record directly into a raw image
pub fn plant_block_start(buf: &mut [u8], block: usize, sequence: u32) {
    let offset = block * BLOCK_SIZE;
    buf[offset..offset + BLOCK_START_SIZE].copy_from_slice(&block_start(sequence));
}

/// Plant an arbitrary entry directly into a raw image
pub fn plant_entry(buf: &mut [u8], offset: usize, kind: u8, flags: u8, payload: &[u8]) {
    let raw = entry_bytes(kind, flags, payload);
    buf[offset..offset + raw.len()].copy_from_slice(&raw);
}
