//! Schema helpers: tables, fields and rows.

use crate::entry::{self, Data, Field, FieldType};
use crate::error::Error;
use crate::log::Log;
use crate::platform::{Platform, system_time};
use crate::{FieldId, TableId};

/// Writes the records describing one data set and its rows.
///
/// The application should refresh the table and field records on every
/// system restart. Major structural changes would probably require a new
/// table name, perhaps with a version number.
pub struct Table<'a, P: Platform> {
    log: &'a mut Log<P>,
    id: TableId,
}

impl<'a, P: Platform> Table<'a, P> {
    /// Bind to `log` and allocate the next table id.
    pub fn new(log: &'a mut Log<P>) -> Self {
        let id = log.allocate_table_id();
        Self { log, id }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    /// Write the table record, e.g. with the name of the device.
    pub fn write_table(&mut self, name: &str) -> Result<(), Error> {
        let record = entry::Table { id: self.id };
        self.log.write_record(&record, name.as_bytes())
    }

    /// Write a field record describing one column of data.
    pub fn write_field(
        &mut self,
        id: FieldId,
        type_: FieldType,
        size: u8,
        name: &str,
        variable: bool,
    ) -> Result<(), Error> {
        let record = Field {
            id,
            type_,
            variable,
            size,
        };
        self.log.write_record(&record, name.as_bytes())
    }

    /// Write a field record for a Rust value type.
    ///
    /// ```ignore
    /// table.write_field_for::<f32>(1, "temperature")?;
    /// table.write_field_for::<Text>(2, "status")?;
    /// ```
    pub fn write_field_for<T: FieldValue>(&mut self, id: FieldId, name: &str) -> Result<(), Error> {
        self.write_field(id, T::TYPE, T::SIZE, name, T::VARIABLE)
    }

    /// Write one complete row for this table, stamped with the current
    /// system time. The row carries the values in the same order and size as
    /// the fields.
    pub fn write_data(&mut self, row: &[u8]) -> Result<(), Error> {
        let record = Data {
            system_time: system_time::<P>(),
            table: self.id,
            reserved: 0,
        };
        self.log.write_record(&record, row)
    }
}

/// Maps a Rust value type onto a field descriptor.
pub trait FieldValue {
    const TYPE: FieldType;
    const SIZE: u8;
    const VARIABLE: bool = false;
}

macro_rules! field_value {
    ($($t:ty => $type_:ident),* $(,)?) => {
        $(impl FieldValue for $t {
            const TYPE: FieldType = FieldType::$type_;
            const SIZE: u8 = size_of::<$t>() as u8;
        })*
    };
}

field_value! {
    u8 => Unsigned, u16 => Unsigned, u32 => Unsigned, u64 => Unsigned,
    i8 => Signed, i16 => Signed, i32 => Signed, i64 => Signed,
    f32 => Float, f64 => Float,
}

/// Variable-length text field. Rows store the actual length as `u16` in the
/// fixed portion; the bytes follow after the fixed portion.
pub struct Text;

impl FieldValue for Text {
    const TYPE: FieldType = FieldType::Char;
    const SIZE: u8 = 1;
    const VARIABLE: bool = true;
}
