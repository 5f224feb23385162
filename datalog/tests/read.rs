mod common;

use common::{BLOCK_SIZE, Flash};
use datalog::{Error, Kind, Log, Reader, SeekOrigin};
use pretty_assertions::assert_eq;

/// Lay down three blocks: boot, a block-filling data record, another boot.
/// Leaves write_offset at 148.
fn three_blocks(flash: &mut Flash) {
    let mut log = Log::new(flash).unwrap();
    log.write_entry(Kind::Boot, &[1], &[]).unwrap();
    log.write_entry(Kind::Data, &[2; 48], &[]).unwrap();
    log.write_entry(Kind::Boot, &[2], &[]).unwrap();
    assert_eq!(log.end_sequence(), 3);
    assert_eq!(log.write_offset(), 148);
}

#[test]
fn empty_log_has_no_bytes() {
    let mut flash = Flash::new(4);
    let mut log = Log::new(&mut flash).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(log.read(0, 0, &mut buf), Ok(0));
}

#[test]
fn sequence_past_the_end_is_refused() {
    let mut flash = Flash::new(4);
    let mut log = Log::new(&mut flash).unwrap();
    log.write_entry(Kind::Boot, &[1], &[]).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(log.read(2, 0, &mut buf), Err(Error::NoData));
}

#[test]
fn read_spans_blocks() {
    let mut flash = Flash::new(4);
    three_blocks(&mut flash);

    let image = flash.buf.clone();
    let mut log = Log::new(&mut flash).unwrap();
    let mut buf = [0u8; 256];
    let count = log.read(log.start_sequence(), 0, &mut buf).unwrap();
    assert_eq!(count, 148);
    assert_eq!(&buf[..count], &image[..148]);
}

#[test]
fn read_clamps_at_the_write_frontier() {
    let mut flash = Flash::new(4);
    three_blocks(&mut flash);

    let mut log = Log::new(&mut flash).unwrap();
    let mut buf = [0u8; 64];
    // the end block holds 20 live bytes
    let count = log.read(3, 0, &mut buf).unwrap();
    assert_eq!(count, 20);
}

#[test]
fn read_crosses_the_ring_seam() {
    let mut flash = Flash::new(4);
    // live run 7, 8, 9 sits in slots 2, 3, 0; slot 1 is a ghost
    common::plant_block_start(&mut flash.buf, 0, 9);
    common::plant_entry(&mut flash.buf, 12, Kind::Boot as u8, 0xFE, &[1]);
    common::plant_block_start(&mut flash.buf, 1, 3);
    common::plant_block_start(&mut flash.buf, 2, 7);
    common::plant_block_start(&mut flash.buf, 3, 8);
    common::plant_entry(
        &mut flash.buf,
        3 * BLOCK_SIZE + 12,
        Kind::Data as u8,
        0xFE,
        &[9; 8],
    );
    let image = flash.buf.clone();

    let mut log = Log::new(&mut flash).unwrap();
    assert_eq!(log.start_block().number, 2);
    assert_eq!(log.start_sequence(), 7);
    assert_eq!(log.end_sequence(), 9);
    assert_eq!(log.write_offset(), 20);

    // sequence 8 maps to the last physical slot
    let mut buf = [0u8; 64];
    let count = log.read(8, 0, &mut buf).unwrap();
    assert_eq!(count, 64);
    assert_eq!(&buf[..], &image[3 * BLOCK_SIZE..4 * BLOCK_SIZE]);

    // a span from inside sequence 8 runs over the seam into slot 0
    let mut buf = [0u8; 64];
    let count = log.read(8, 32, &mut buf).unwrap();
    assert_eq!(count, 52);
    assert_eq!(&buf[..32], &image[3 * BLOCK_SIZE + 32..4 * BLOCK_SIZE]);
    assert_eq!(&buf[32..52], &image[..20]);

    let mut buf = [0u8; 16];
    assert_eq!(log.read(10, 0, &mut buf), Err(Error::NoData));
}

#[test]
fn scan_after_reboot_sees_the_same_entries() {
    let mut flash = Flash::new(4);
    let mut written: Vec<(u8, Vec<u8>)> = Vec::new();
    {
        let mut log = Log::new(&mut flash).unwrap();
        for (kind, payload) in [
            (Kind::Boot, vec![1u8]),
            (Kind::Time, vec![0x10, 0, 0, 0, 0x20, 0, 0, 0]),
            (Kind::Table, b"\x01\x00env".to_vec()),
            (Kind::Data, vec![0xAA; 30]),
            (Kind::Data, vec![0xBB; 45]),
            (Kind::Boot, vec![2]),
        ] {
            log.write_entry(kind, &payload, &[]).unwrap();
            written.push((kind as u8, payload));
        }
    }

    let mut log = Log::new(&mut flash).unwrap();
    let start = log.start_sequence();
    let mut reader = Reader::new(&mut log, start);
    let mut stream = Vec::new();
    let mut chunk = [0u8; 32];
    loop {
        let count = reader.read_memory_block(&mut chunk);
        if count == 0 {
            break;
        }
        stream.extend_from_slice(&chunk[..count]);
        reader.seek_from(count as i32, SeekOrigin::Current).unwrap();
    }
    assert!(reader.is_finished());

    assert_eq!(parse_stream(&stream), written);
}

#[test]
fn reader_streams_the_whole_log() {
    let mut flash = Flash::new(4);
    three_blocks(&mut flash);

    let image = flash.buf.clone();
    let mut log = Log::new(&mut flash).unwrap();
    assert_eq!(log.start_sequence(), 1);

    let mut reader = Reader::new(&mut log, 1);
    assert_eq!(reader.mime_type(), "application/octet-stream");

    let mut stream = Vec::new();
    let mut chunk = [0u8; 10];
    loop {
        let count = reader.read_memory_block(&mut chunk);
        if count == 0 {
            break;
        }
        stream.extend_from_slice(&chunk[..count]);
        reader.seek_from(count as i32, SeekOrigin::Current).unwrap();
    }

    assert!(reader.is_finished());
    assert_eq!(stream.len(), 148);
    assert_eq!(&stream[..], &image[..148]);
}

#[test]
fn bounded_reader_stops_after_its_blocks() {
    let mut flash = Flash::new(4);
    three_blocks(&mut flash);

    let image = flash.buf.clone();
    let mut log = Log::new(&mut flash).unwrap();
    let mut reader = Reader::with_block_count(&mut log, 1, 1);

    let mut stream = Vec::new();
    let mut chunk = [0u8; 24];
    loop {
        let count = reader.read_memory_block(&mut chunk);
        if count == 0 {
            break;
        }
        stream.extend_from_slice(&chunk[..count]);
        reader.seek_from(count as i32, SeekOrigin::Current).unwrap();
    }

    // exactly one block, unwritten tail included
    assert_eq!(stream.len(), BLOCK_SIZE);
    assert_eq!(&stream[..], &image[..BLOCK_SIZE]);
}

#[test]
fn seeking_respects_the_bound() {
    let mut flash = Flash::new(4);
    three_blocks(&mut flash);

    let mut log = Log::new(&mut flash).unwrap();
    let mut reader = Reader::new(&mut log, 1);

    assert_eq!(reader.seek_from(-1, SeekOrigin::Start), Err(Error::SeekOutOfRange));
    assert_eq!(reader.seek_from(1, SeekOrigin::End), Err(Error::SeekOutOfRange));
    assert_eq!(reader.seek_from(-20, SeekOrigin::End), Ok(128));
    assert_eq!(reader.seek_from(16, SeekOrigin::Current), Ok(144));
    assert!(!reader.is_finished());
    assert_eq!(reader.seek_from(0, SeekOrigin::End), Ok(148));
    assert!(reader.is_finished());
}

/// Walk a dumped span entry by entry, pads and block records transparent,
/// torn records skipped.
fn parse_stream(stream: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset + 4 <= stream.len() {
        let size = u16::from_le_bytes([stream[offset], stream[offset + 1]]) as usize;
        let kind = stream[offset + 2];
        let flags = stream[offset + 3];
        if kind == Kind::Erased as u8 {
            // the rest of this block was never written
            offset = (offset / BLOCK_SIZE + 1) * BLOCK_SIZE;
            continue;
        }
        if kind != Kind::Pad as u8 && kind != Kind::Block as u8 && flags & 1 == 0 {
            entries.push((kind, stream[offset + 4..offset + 4 + size].to_vec()));
        }
        offset += 4 + size.next_multiple_of(4);
    }
    entries
}
