//! CSV export of decoded data rows.

use std::io;

use csv::WriterBuilder;

use crate::Result;
use crate::error::Error;
use crate::types::{EntryBody, Image};

/// Write every decoded row of `table` as CSV: a system time and UTC column,
/// then one column per field. Returns the number of rows written.
pub fn write_csv<W: io::Write>(out: W, image: &Image, table: &str) -> Result<usize> {
    let def = image
        .tables
        .iter()
        .find(|def| def.name == table)
        .ok_or_else(|| Error::TableNotFound(table.to_string()))?;

    // rows whose decode failed carry no values; don't let them abort the file
    let mut writer = WriterBuilder::new().flexible(true).from_writer(out);

    let mut header = vec!["system_time".to_string(), "utc".to_string()];
    header.extend(def.fields.iter().map(|field| field.name.clone()));
    writer.write_record(&header)?;

    let mut rows = 0;
    for entry in &image.entries {
        let EntryBody::Data(row) = &entry.body else {
            continue;
        };
        if row.table_name.as_deref() != Some(table) {
            continue;
        }

        let mut record = vec![
            row.system_time.to_string(),
            row.utc.map(|utc| format!("{utc:.3}")).unwrap_or_default(),
        ];
        record.extend(row.values.iter().map(|value| value.to_string()));
        writer.write_record(&record)?;
        rows += 1;
    }

    writer.flush()?;
    Ok(rows)
}
