//! Raw partition image parsing.
//!
//! Blocks are located by their block records, ordered by sequence number and
//! walked entry by entry. Pads and torn records are transparent; schema
//! records build up the decode context for the data rows that follow them.

use std::collections::BTreeMap;

use crate::Result;
use crate::error::Error;
use crate::types::{
    BLOCK_START_SIZE, DataRow, EntryBody, FieldDef, FieldType, HEADER_SIZE, Image, Kind, MAGIC,
    ParsedBlock, ParsedEntry, TableDef, Value,
};

/// Decode state carried across entries. Table ids restart at every boot, so
/// a boot record closes out the previous session's schema.
#[derive(Default)]
struct Context {
    tables: BTreeMap<u16, TableDef>,
    current: Option<u16>,
    /// The last time record, anchoring system time to UTC
    time: Option<(u32, u32)>,
    finished_tables: Vec<TableDef>,
}

impl Context {
    fn reset(&mut self) {
        let tables = std::mem::take(&mut self.tables);
        self.finished_tables.extend(tables.into_values());
        self.current = None;
        self.time = None;
    }
}

/// Parse a raw partition image into blocks and decoded entries.
pub fn parse_image(data: &[u8], block_size: usize) -> Result<Image> {
    if block_size < BLOCK_START_SIZE || !block_size.is_multiple_of(4) {
        return Err(Error::InvalidBlockSize(block_size));
    }

    // survey the block records; a trailing partial chunk is ignored
    let mut blocks = Vec::new();
    for (slot, chunk) in data.chunks_exact(block_size).enumerate() {
        if let Some(sequence) = parse_block_start(chunk) {
            blocks.push(ParsedBlock { slot, sequence });
        }
    }
    blocks.sort_by_key(|block| block.sequence);

    let mut ctx = Context::default();
    let mut entries = Vec::new();
    for block in &blocks {
        let base = block.slot * block_size;
        let content = &data[base..base + block_size];
        let mut offset = BLOCK_START_SIZE;
        while offset + HEADER_SIZE <= block_size {
            let size = u16::from_le_bytes([content[offset], content[offset + 1]]) as usize;
            let kind = content[offset + 2];
            let flags = content[offset + 3];
            if kind == Kind::Erased as u8 {
                break;
            }
            if offset + HEADER_SIZE + size > block_size {
                // the last record was torn mid-header
                break;
            }

            let advance = HEADER_SIZE + size.next_multiple_of(4);
            if kind == Kind::Pad as u8 || flags == 0xFF {
                // padding and never-committed records are transparent
                offset += advance;
                continue;
            }
            if flags != 0xFE {
                // anything else means the block tail cannot be trusted
                eprintln!(
                    "corrupt block {:#x}, skipping from offset {:#x}",
                    block.sequence, offset
                );
                break;
            }

            let payload = &content[offset + HEADER_SIZE..offset + HEADER_SIZE + size];
            let body = decode_entry(kind, payload, &mut ctx);
            entries.push(ParsedEntry {
                offset: base + offset,
                sequence: block.sequence,
                body,
            });
            offset += advance;
        }
    }

    ctx.reset();
    Ok(Image {
        block_size,
        blocks,
        entries,
        tables: ctx.finished_tables,
    })
}

fn parse_block_start(chunk: &[u8]) -> Option<u32> {
    let size = u16::from_le_bytes([chunk[0], chunk[1]]) as usize;
    let kind = chunk[2];
    let magic = le_u32(&chunk[4..8]);
    let sequence = le_u32(&chunk[8..12]);
    (size == 8 && kind == Kind::Block as u8 && magic == MAGIC).then_some(sequence)
}

fn decode_entry(kind: u8, payload: &[u8], ctx: &mut Context) -> EntryBody {
    match Kind::from_byte(kind) {
        Some(Kind::Boot) if !payload.is_empty() => {
            // a new session: previous table ids no longer apply
            ctx.reset();
            EntryBody::Boot { reason: payload[0] }
        }
        Some(Kind::Time) if payload.len() >= 8 => {
            let system_time = le_u32(&payload[0..4]);
            let utc = le_u32(&payload[4..8]);
            ctx.time = Some((system_time, utc));
            EntryBody::Time { system_time, utc }
        }
        Some(Kind::Table) if payload.len() >= 2 => {
            let id = u16::from_le_bytes([payload[0], payload[1]]);
            let name = String::from_utf8_lossy(&payload[2..]).into_owned();
            ctx.tables.insert(
                id,
                TableDef {
                    id,
                    name: name.clone(),
                    fields: Vec::new(),
                    fixed_size: 0,
                },
            );
            ctx.current = Some(id);
            EntryBody::Table { id, name }
        }
        Some(Kind::Field) if payload.len() >= 4 => {
            let Some(type_) = FieldType::from_byte(payload[2] & 0x7F) else {
                return EntryBody::Unknown {
                    kind,
                    content: payload.to_vec(),
                };
            };
            let mut field = FieldDef {
                id: u16::from_le_bytes([payload[0], payload[1]]),
                type_,
                variable: payload[2] & 0x80 != 0,
                size: payload[3],
                name: String::from_utf8_lossy(&payload[4..]).into_owned(),
                offset: 0,
            };
            if let Some(table) = ctx.current.and_then(|id| ctx.tables.get_mut(&id)) {
                field.offset = table.fixed_size;
                table.fixed_size += if field.variable {
                    2
                } else {
                    field.size as usize
                };
                table.fields.push(field.clone());
            }
            EntryBody::Field(field)
        }
        Some(Kind::Data) if payload.len() >= 8 => {
            let system_time = le_u32(&payload[0..4]);
            let table = u16::from_le_bytes([payload[4], payload[5]]);
            let raw = payload[8..].to_vec();
            let def = ctx.tables.get(&table);
            let values = def.and_then(|def| decode_row(def, &raw)).unwrap_or_default();
            let utc = ctx.time.map(|(anchor, utc)| {
                f64::from(utc) + f64::from(system_time.wrapping_sub(anchor)) / 1000.0
            });
            EntryBody::Data(DataRow {
                system_time,
                utc,
                table,
                table_name: def.map(|def| def.name.clone()),
                values,
                raw,
            })
        }
        Some(Kind::Exception) if payload.len() >= 24 => EntryBody::Exception {
            cause: le_u32(&payload[0..4]),
            epc1: le_u32(&payload[4..8]),
            epc2: le_u32(&payload[8..12]),
            epc3: le_u32(&payload[12..16]),
            excvaddr: le_u32(&payload[16..20]),
            depc: le_u32(&payload[20..24]),
            stack: payload[24..].chunks_exact(4).map(le_u32).collect(),
        },
        Some(Kind::Map) => EntryBody::Map {
            sequences: payload.chunks_exact(4).map(le_u32).collect(),
        },
        _ => EntryBody::Unknown {
            kind,
            content: payload.to_vec(),
        },
    }
}

/// Decode one row against its table schema. Fixed fields sit at their
/// resolved offsets; variable fields store a length there and their bytes
/// sequentially after the fixed portion.
fn decode_row(table: &TableDef, row: &[u8]) -> Option<Vec<Value>> {
    let mut values = Vec::with_capacity(table.fields.len());
    let mut variable_offset = table.fixed_size;
    for field in &table.fields {
        if field.variable {
            let raw = row.get(field.offset..field.offset + 2)?;
            let length = u16::from_le_bytes([raw[0], raw[1]]) as usize * field.size as usize;
            let bytes = row.get(variable_offset..variable_offset + length)?;
            variable_offset += length;
            values.push(decode_variable(field, bytes)?);
        } else {
            let bytes = row.get(field.offset..field.offset + field.size as usize)?;
            values.push(decode_fixed(field, bytes)?);
        }
    }
    Some(values)
}

fn decode_fixed(field: &FieldDef, bytes: &[u8]) -> Option<Value> {
    let value = match (field.type_, field.size) {
        (FieldType::Unsigned, 1 | 2 | 4 | 8) => Value::Unsigned(le_uint(bytes)),
        (FieldType::Signed, 1) => Value::Signed(i64::from(bytes[0] as i8)),
        (FieldType::Signed, 2) => Value::Signed(i64::from(i16::from_le_bytes([
            bytes[0], bytes[1],
        ]))),
        (FieldType::Signed, 4) => Value::Signed(i64::from(i32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ]))),
        (FieldType::Signed, 8) => Value::Signed(i64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ])),
        (FieldType::Float, 4) => Value::Float(f64::from(f32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ]))),
        (FieldType::Float, 8) => Value::Float(f64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ])),
        (FieldType::Char, _) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        _ => return None,
    };
    Some(value)
}

fn decode_variable(field: &FieldDef, bytes: &[u8]) -> Option<Value> {
    if field.type_ == FieldType::Char {
        return Some(Value::Text(String::from_utf8_lossy(bytes).into_owned()));
    }

    // arrays of numeric elements render as a space-separated list
    let mut rendered = String::new();
    for element in bytes.chunks_exact(field.size as usize) {
        let value = decode_fixed(field, element)?;
        if !rendered.is_empty() {
            rendered.push(' ');
        }
        rendered.push_str(&value.to_string());
    }
    Some(Value::Text(rendered))
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn le_uint(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}
