//! The storage engine: initialisation scan, write path and circular reads.

use crate::entry::{
    self, Block, Boot, FLAG_INVALID, HEADER_SIZE, Header, Kind, MAGIC, Record, Time, WORD,
    align_up, write_padded,
};
use crate::error::Error;
use crate::platform::{Platform, system_time};
use crate::{Size, TableId};
use alloc::vec;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

/// Flash pages per log block. Four pages (nominally 16 KiB) keep the cost of
/// end-of-block padding low.
const PAGES_PER_BLOCK: u32 = 4;

const BLOCK_START_SIZE: u32 = HEADER_SIZE + Block::SIZE as u32;

/// A block record together with its header, written in a single call when a
/// block is started.
struct BlockStart {
    header: Header,
    block: Block,
}

impl BlockStart {
    fn new(sequence: u32) -> Self {
        Self {
            // The size and magic fields alone validate a block record, so
            // the invalid bit is left set for this kind.
            header: Header::new(Kind::Block, Block::SIZE as Size, 0xFF),
            block: Block {
                magic: MAGIC,
                sequence,
            },
        }
    }

    fn to_bytes(&self) -> [u8; BLOCK_START_SIZE as usize] {
        let mut raw = [0u8; BLOCK_START_SIZE as usize];
        raw[..4].copy_from_slice(&self.header.to_bytes());
        self.block.encode(&mut raw[4..]);
        raw
    }

    fn from_bytes(raw: [u8; BLOCK_START_SIZE as usize]) -> Self {
        Self {
            header: Header::from_bytes([raw[0], raw[1], raw[2], raw[3]]),
            block: Block::from_bytes([
                raw[4], raw[5], raw[6], raw[7], raw[8], raw[9], raw[10], raw[11],
            ]),
        }
    }

    fn is_valid(&self) -> bool {
        self.header.size as usize == Block::SIZE
            && self.header.kind == Kind::Block as u8
            && self.block.magic == MAGIC
    }
}

/// Physical slot and sequence number of one block.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockInfo {
    /// Slot index within the partition, modulo the block count
    pub number: u32,
    /// Monotonic sequence number; zero means none
    pub sequence: u32,
}

#[derive(Debug, PartialEq, Eq)]
enum State {
    Ready,
    /// A write is in flight. Observed at entry to `write_entry` only when a
    /// previous call was cut short, either by an adapter fault or by a crash
    /// handler re-entering the log.
    Busy,
}

/// Circular flash data log.
///
/// The partition is treated as a FIFO of blocks. When the writer wraps onto
/// the oldest block, that block is retired and erased. Entries are not
/// permitted to straddle blocks: if an entry won't fit in the available
/// space, a pad record consumes the tail and a new block is started.
///
/// Elements written out are kept small. Order as follows:
///
/// - `table` identifies a data source
/// - `field` entries identify table fields (columns) and their types
/// - `data` records contain actual data
///
/// The `table` and `field` records must appear together and in that order.
/// The application should write these on every system restart; this
/// accommodates updates to amend table structures if required.
///
/// For long-term storage the log must be replicated to a server; see
/// [`Reader`](crate::Reader).
///
/// # Endurance
///
/// SPI flash (e.g. Winbond w25q32) is rated at > 100,000 erase cycles,
/// which bounds the reachable sequence space far below `u32::MAX`; sequence
/// overflow is therefore not handled.
pub struct Log<P: Platform> {
    partition: P,
    /// Oldest block in the log (the one with the lowest live sequence)
    start_block: BlockInfo,
    /// Current write block
    end_block: BlockInfo,
    /// Absolute partition offset of the next free byte
    write_offset: u32,
    block_size: u32,
    total_blocks: u32,
    state: State,
    /// Used to assign table ids
    table_count: TableId,
}

impl<P: Platform> Log<P> {
    /// Scan the partition and prepare the log for writing.
    ///
    /// The entire partition must have been blank (all 0xFF) before first
    /// use; from then on any mix of live blocks, leftovers from an earlier
    /// wrap and foreign contents is tolerated by the scan.
    pub fn new(partition: P) -> Result<Self, Error> {
        let (log, _) = Self::scan(partition)?;
        Ok(log)
    }

    /// Like [`Log::new`], but records a snapshot of the block sequence map
    /// followed by a boot record before returning.
    pub fn new_with_boot_records(partition: P) -> Result<Self, Error> {
        let (mut log, sequences) = Self::scan(partition)?;

        let mut map = vec![0u8; sequences.len() * 4];
        for (chunk, sequence) in map.chunks_exact_mut(4).zip(&sequences) {
            chunk.copy_from_slice(&sequence.to_le_bytes());
        }
        log.write_entry(Kind::Map, &map, &[])?;
        log.write_boot()?;

        Ok(log)
    }

    fn scan(mut partition: P) -> Result<(Self, Vec<u32>), Error> {
        let block_size = P::ERASE_SIZE as u32 * PAGES_PER_BLOCK;
        if block_size == 0 {
            return Err(Error::InvalidPartitionSize);
        }
        let total_blocks = partition.capacity() as u32 / block_size;
        if total_blocks == 0 {
            return Err(Error::InvalidPartitionSize);
        }

        // Read all block sequence numbers
        let mut sequences = vec![0u32; total_blocks as usize];
        for number in 0..total_blocks {
            let mut raw = [0xFFu8; BLOCK_START_SIZE as usize];
            read_or_erased(&mut partition, number * block_size, &mut raw);
            let start = BlockStart::from_bytes(raw);

            #[cfg(feature = "defmt")]
            trace!(
                "{:#08x} blk #{} seq {:08x}",
                number * block_size,
                number,
                start.block.sequence
            );

            if start.is_valid() {
                sequences[number as usize] = start.block.sequence;
            }
        }

        // Find maximum block sequence
        let mut end_block = BlockInfo::default();
        for (number, &sequence) in sequences.iter().enumerate() {
            if sequence > end_block.sequence {
                end_block = BlockInfo {
                    number: number as u32,
                    sequence,
                };
            }
        }

        let mut start_block = end_block;
        let mut write_offset = 0;
        if end_block.sequence != 0 {
            // Scan backwards to find the oldest block still contiguous with
            // the end block. The first mismatch separates live blocks from
            // ghosts of an earlier generation.
            let mut block = end_block;
            loop {
                start_block = block;
                if block.sequence == 1 {
                    break;
                }
                block.number = if block.number == 0 {
                    total_blocks - 1
                } else {
                    block.number - 1
                };
                block.sequence -= 1;
                if sequences[block.number as usize] != block.sequence {
                    break;
                }
            }

            // Scan the end block for the write position
            write_offset = end_block.number * block_size;
            let end_offset = write_offset + block_size;
            loop {
                let mut raw = [0xFFu8; HEADER_SIZE as usize];
                read_or_erased(&mut partition, write_offset, &mut raw);
                let header = Header::from_bytes(raw);
                if header.is_erased() {
                    break;
                }

                #[cfg(feature = "debug-logs")]
                println!(
                    "{write_offset:#06x} kind {} size {}",
                    header.kind, header.size
                );

                write_offset += align_up(HEADER_SIZE + u32::from(header.size));
                if write_offset >= end_offset {
                    break;
                }
            }

            if write_offset > end_offset {
                // The last entry was torn mid-header; the tail of this block
                // is unusable until the ring wraps back onto it
                #[cfg(feature = "defmt")]
                warn!("end block {:08x} scan overflowed", end_block.sequence);
                write_offset = end_offset;
            }
        }

        #[cfg(feature = "defmt")]
        {
            trace!(
                "start_block #{} seq {:08x}",
                start_block.number, start_block.sequence
            );
            trace!(
                "end_block #{} seq {:08x}",
                end_block.number, end_block.sequence
            );
            trace!("write_offset = {:#08x}", write_offset);
        }

        #[cfg(feature = "debug-logs")]
        println!(
            "start #{} seq {:08x}, end #{} seq {:08x}, write_offset {:#08x}",
            start_block.number,
            start_block.sequence,
            end_block.number,
            end_block.sequence,
            write_offset
        );

        Ok((
            Self {
                partition,
                start_block,
                end_block,
                write_offset,
                block_size,
                total_blocks,
                state: State::Ready,
                table_count: 0,
            },
            sequences,
        ))
    }

    /// Write an entry of any kind.
    ///
    /// The payload is framed as `info` followed by `data`; the split lets a
    /// caller pass a fixed descriptor and a variable tail without gathering
    /// them into one buffer first.
    pub fn write_entry(&mut self, kind: Kind, info: &[u8], data: &[u8]) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("write_entry {} [{} + {}]", kind, info.len(), data.len());

        let content_len = (info.len() + data.len()) as u32;
        if content_len > self.block_size - BLOCK_START_SIZE - HEADER_SIZE {
            return Err(Error::EntryTooLarge);
        }

        if self.state == State::Busy {
            // A previous call was interrupted mid-write, e.g. by a crash
            // handler recording an exception. The torn record keeps its
            // invalid flag set; parsers skip it.
            if self.write_offset % self.block_size == 0 {
                // Start of a new block, will get erased anyway
            } else {
                // write_offset only advances after the flash write lands
                self.write_offset %= self.block_size * self.total_blocks;
                let mut raw = [0xFFu8; HEADER_SIZE as usize];
                read_or_erased(&mut self.partition, self.write_offset, &mut raw);
                let header = Header::from_bytes(raw);
                if !header.is_erased() {
                    self.write_offset += HEADER_SIZE + align_up(u32::from(header.size));
                }
            }
        }

        self.state = State::Busy;

        let entry_size = HEADER_SIZE + content_len;
        let space = self.block_size - (self.write_offset % self.block_size);
        if space < entry_size {
            // No room in this block, pad out the tail. The pad's size field
            // alone records its extent, so it is committed in one write.
            let header = Header::new(Kind::Pad, (space - HEADER_SIZE) as Size, 0);

            #[cfg(feature = "defmt")]
            trace!("pad {} @ {:#08x}", header.size, self.write_offset);
            #[cfg(feature = "debug-logs")]
            println!("pad {} @ {:#08x}", header.size, self.write_offset);

            write_padded(&mut self.partition, self.write_offset, &header.to_bytes())?;
            self.write_offset += space;
        }

        if self.write_offset % self.block_size == 0 {
            self.write_offset %= self.block_size * self.total_blocks;
            self.end_block.number = self.write_offset / self.block_size;
            self.end_block.sequence += 1;
            if self.end_block.number == self.start_block.number && self.start_block.sequence != 0 {
                // Retire the oldest block; readers mid-transfer must verify
                // their copy against the start sequence afterwards
                #[cfg(feature = "defmt")]
                warn!(
                    "retire block #{} seq {:08x}",
                    self.start_block.number, self.start_block.sequence
                );
                #[cfg(feature = "debug-logs")]
                println!(
                    "retire block #{} seq {:08x}",
                    self.start_block.number, self.start_block.sequence
                );

                self.start_block.number = (self.start_block.number + 1) % self.total_blocks;
                self.start_block.sequence += 1;
            }

            // Initialise the block
            #[cfg(feature = "defmt")]
            trace!(
                "initialise block #{} seq {:08x} @ {:#08x}",
                self.end_block.number, self.end_block.sequence, self.write_offset
            );
            #[cfg(feature = "debug-logs")]
            println!(
                "initialise block #{} seq {:08x} @ {:#08x}",
                self.end_block.number, self.end_block.sequence, self.write_offset
            );

            self.partition
                .erase(self.write_offset, self.write_offset + self.block_size)
                .map_err(|_| Error::FlashError)?;
            let start = BlockStart::new(self.end_block.sequence);
            write_padded(&mut self.partition, self.write_offset, &start.to_bytes())?;
            self.write_offset += BLOCK_START_SIZE;
        }

        // Two-phase commit: the header goes out with the invalid bit set,
        // then the payload, then the same word again with the bit cleared.
        // Flash bits only move 1 -> 0 within an erased region, so the second
        // header write cannot disturb the first.
        let mut header = Header::new(kind, content_len as Size, 0xFF);
        write_padded(&mut self.partition, self.write_offset, &header.to_bytes())?;
        write_padded(&mut self.partition, self.write_offset + HEADER_SIZE, info)?;
        if !data.is_empty() {
            write_padded(
                &mut self.partition,
                self.write_offset + HEADER_SIZE + info.len() as u32,
                data,
            )?;
        }
        header.flags &= !FLAG_INVALID;
        write_padded(&mut self.partition, self.write_offset, &header.to_bytes())?;

        // Entries always start on a word boundary
        self.write_offset += HEADER_SIZE + align_up(content_len);

        self.state = State::Ready;
        Ok(())
    }

    /// Frame a typed descriptor, optionally followed by variable content.
    pub fn write_record<R: Record>(&mut self, record: &R, data: &[u8]) -> Result<(), Error> {
        let mut info = [0u8; entry::MAX_RECORD_SIZE];
        record.encode(&mut info[..R::SIZE]);
        self.write_entry(R::KIND, &info[..R::SIZE], data)
    }

    /// Record the current system time against the RTC.
    pub fn write_time(&mut self) -> Result<(), Error> {
        let time = Time {
            system_time: system_time::<P>(),
            utc: P::utc(),
        };
        self.write_record(&time, &[])
    }

    /// Record the reason for the most recent reset.
    pub fn write_boot(&mut self) -> Result<(), Error> {
        let boot = Boot {
            reason: P::reset_reason(),
        };
        self.write_record(&boot, &[])
    }

    /// Allocate the next table id.
    ///
    /// Ids restart at every boot and are never persisted; consumers resolve
    /// them within the session delimited by boot records.
    pub fn allocate_table_id(&mut self) -> TableId {
        self.table_count += 1;
        self.table_count
    }

    /// Read bytes starting at `offset` within the logical block carrying
    /// `sequence`.
    ///
    /// Reads may run on into subsequent blocks up to the write frontier.
    /// Returns the count of bytes actually read, zero meaning "no more".
    /// Requesting a sequence ahead of the current write block fails with
    /// [`Error::NoData`].
    pub fn read(&mut self, sequence: u32, offset: u32, buf: &mut [u8]) -> Result<usize, Error> {
        if self.state != State::Ready || sequence > self.end_block.sequence {
            return Err(Error::NoData);
        }

        #[cfg(feature = "defmt")]
        trace!("read: seq {}, offset {}, size {}", sequence, offset, buf.len());

        let total_size = self.total_blocks * self.block_size;
        let slot = u64::from(self.start_block.number)
            + u64::from(sequence.wrapping_sub(self.start_block.sequence));
        let mut read_offset =
            ((slot * u64::from(self.block_size) + u64::from(offset)) % u64::from(total_size)) as u32;

        let mut bytes_read = 0;
        if read_offset > self.write_offset {
            // The span crosses the ring seam
            let len = buf.len().min((total_size - read_offset) as usize);
            read_or_erased(&mut self.partition, read_offset, &mut buf[..len]);
            bytes_read += len;
            read_offset = 0;
        }
        let len = (buf.len() - bytes_read).min((self.write_offset - read_offset) as usize);
        if len != 0 {
            read_or_erased(
                &mut self.partition,
                read_offset,
                &mut buf[bytes_read..bytes_read + len],
            );
            bytes_read += len;
        }

        Ok(bytes_read)
    }

    pub fn is_ready(&self) -> bool {
        self.state == State::Ready
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    /// Oldest block in the log
    pub fn start_block(&self) -> BlockInfo {
        self.start_block
    }

    /// Current write block
    pub fn end_block(&self) -> BlockInfo {
        self.end_block
    }

    pub fn start_sequence(&self) -> u32 {
        self.start_block.sequence
    }

    pub fn end_sequence(&self) -> u32 {
        self.end_block.sequence
    }

    /// Count of complete blocks in the live ring
    pub fn full_block_count(&self) -> u32 {
        self.end_block.sequence - self.start_block.sequence
    }

    /// Absolute partition offset of the next free byte
    pub fn write_offset(&self) -> u32 {
        self.write_offset
    }
}

/// Read from the partition, treating any adapter failure as erased flash.
/// Offset and length need not be word-aligned; a bounce buffer covers the
/// aligned superset when they are not.
fn read_or_erased<P: Platform>(partition: &mut P, offset: u32, buf: &mut [u8]) {
    let front = (offset % WORD) as usize;
    if front == 0 && buf.len().is_multiple_of(WORD as usize) {
        if partition.read(offset, buf).is_err() {
            buf.fill(0xFF);
        }
        return;
    }

    let mut raw = vec![0xFFu8; align_up((front + buf.len()) as u32) as usize];
    if partition.read(offset - front as u32, &mut raw).is_err() {
        buf.fill(0xFF);
    } else {
        buf.copy_from_slice(&raw[front..front + buf.len()]);
    }
}
