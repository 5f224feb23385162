use std::fmt;

pub const MAGIC: u32 = 0xA78B_E044;
pub const DEFAULT_BLOCK_SIZE: usize = 16384;
pub const HEADER_SIZE: usize = 4;
pub const BLOCK_START_SIZE: usize = 12;
pub const FLAG_INVALID: u8 = 0x01;

/// Tag byte of every on-flash entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    Pad = 0,
    Block = 1,
    Boot = 2,
    Time = 3,
    Table = 4,
    Field = 5,
    Data = 6,
    Exception = 7,
    Map = 8,
    Erased = 0xFF,
}

impl Kind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Kind::Pad,
            1 => Kind::Block,
            2 => Kind::Boot,
            3 => Kind::Time,
            4 => Kind::Table,
            5 => Kind::Field,
            6 => Kind::Data,
            7 => Kind::Exception,
            8 => Kind::Map,
            0xFF => Kind::Erased,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::Pad => "pad",
            Kind::Block => "block",
            Kind::Boot => "boot",
            Kind::Time => "time",
            Kind::Table => "table",
            Kind::Field => "field",
            Kind::Data => "data",
            Kind::Exception => "exception",
            Kind::Map => "map",
            Kind::Erased => "erased",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Base type of a field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FieldType {
    Unsigned,
    Signed,
    Float,
    Char,
}

impl FieldType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => FieldType::Unsigned,
            1 => FieldType::Signed,
            2 => FieldType::Float,
            3 => FieldType::Char,
            _ => return None,
        })
    }
}

/// One field descriptor, its row offset resolved against the table it
/// belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub id: u16,
    pub type_: FieldType,
    pub variable: bool,
    /// Size in bytes; element size for variable-length fields
    pub size: u8,
    pub name: String,
    /// Byte offset of the fixed portion within a row
    pub offset: usize,
}

impl FieldDef {
    pub fn type_name(&self) -> String {
        let base = match self.type_ {
            FieldType::Unsigned => format!("u{}", u32::from(self.size) * 8),
            FieldType::Signed => format!("i{}", u32::from(self.size) * 8),
            FieldType::Float => format!("f{}", u32::from(self.size) * 8),
            FieldType::Char => "char".to_string(),
        };
        if self.variable { format!("{base}[]") } else { base }
    }
}

/// Schema of one table within a session.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub id: u16,
    pub name: String,
    pub fields: Vec<FieldDef>,
    /// Total size of the fixed portion of a row
    pub fixed_size: usize,
}

/// One decoded row value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unsigned(value) => write!(f, "{value}"),
            Value::Signed(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Text(value) => write!(f, "{value}"),
        }
    }
}

/// Reset reasons reported in boot records.
pub fn boot_reason_name(reason: u8) -> &'static str {
    match reason {
        0 => "Default",
        1 => "WDT",
        2 => "Exception",
        3 => "SoftWDT",
        4 => "SoftRestart",
        5 => "DeepSleepAwake",
        6 => "ExtSysReset",
        _ => "Unknown",
    }
}

/// One data row together with its decode context.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    pub system_time: u32,
    /// UTC seconds derived from the nearest preceding time record
    pub utc: Option<f64>,
    pub table: u16,
    pub table_name: Option<String>,
    /// Decoded values, one per field, when the schema is known
    pub values: Vec<Value>,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryBody {
    Boot {
        reason: u8,
    },
    Time {
        system_time: u32,
        utc: u32,
    },
    Table {
        id: u16,
        name: String,
    },
    Field(FieldDef),
    Data(DataRow),
    Exception {
        cause: u32,
        epc1: u32,
        epc2: u32,
        epc3: u32,
        excvaddr: u32,
        depc: u32,
        stack: Vec<u32>,
    },
    Map {
        sequences: Vec<u32>,
    },
    Unknown {
        kind: u8,
        content: Vec<u8>,
    },
}

impl fmt::Display for EntryBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryBody::Boot { reason } => {
                write!(f, "boot: reason {}", boot_reason_name(*reason))
            }
            EntryBody::Time { system_time, utc } => {
                write!(f, "time: systemTime {system_time}, utc {utc}")
            }
            EntryBody::Table { id, name } => write!(f, "table: id {id}, name '{name}'"),
            EntryBody::Field(field) => write!(
                f,
                "field: id {}, {}, name '{}'",
                field.id,
                field.type_name(),
                field.name
            ),
            EntryBody::Data(row) => {
                write!(f, "data: systemTime {}", row.system_time)?;
                if let Some(utc) = row.utc {
                    write!(f, ", utc {utc:.3}")?;
                }
                match &row.table_name {
                    Some(name) => {
                        write!(f, ", table '{name}': ")?;
                        let mut first = true;
                        for value in &row.values {
                            if !first {
                                write!(f, ", ")?;
                            }
                            write!(f, "{value}")?;
                            first = false;
                        }
                        Ok(())
                    }
                    None => {
                        write!(f, ", table {}, {} bytes:", row.table, row.raw.len())?;
                        for byte in &row.raw {
                            write!(f, " {byte:02x}")?;
                        }
                        Ok(())
                    }
                }
            }
            EntryBody::Exception {
                cause,
                epc1,
                epc2,
                epc3,
                excvaddr,
                depc,
                stack,
            } => write!(
                f,
                "exception: cause {cause:#010x}, epc1 {epc1:#010x}, epc2 {epc2:#010x}, \
                 epc3 {epc3:#010x}, excvaddr {excvaddr:#010x}, depc {depc:#010x}, \
                 stack {} words",
                stack.len()
            ),
            EntryBody::Map { sequences } => {
                write!(f, "map:")?;
                for sequence in sequences {
                    write!(f, " {sequence:#x}")?;
                }
                Ok(())
            }
            EntryBody::Unknown { kind, content } => {
                write!(f, "kind {kind}: {} bytes", content.len())
            }
        }
    }
}

/// One decoded entry with its position in the image.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEntry {
    /// Absolute byte offset within the image
    pub offset: usize,
    /// Sequence number of the containing block
    pub sequence: u32,
    pub body: EntryBody,
}

/// A valid block record found in the image.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ParsedBlock {
    /// Slot position within the image
    pub slot: usize,
    pub sequence: u32,
}

/// A fully parsed partition image, entries in sequence order.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub block_size: usize,
    pub blocks: Vec<ParsedBlock>,
    pub entries: Vec<ParsedEntry>,
    /// Every table seen, in order of appearance across sessions
    pub tables: Vec<TableDef>,
}
