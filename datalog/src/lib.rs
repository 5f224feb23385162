#![doc = include_str!("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

extern crate alloc;

pub mod entry;
pub mod error;
mod log;
pub mod platform;
mod reader;
mod table;

pub use entry::{FieldType, Kind};
pub use error::Error;
pub use log::{BlockInfo, Log};
pub use platform::{Clock, Platform, system_time};
pub use reader::{Reader, SeekOrigin};
pub use table::{FieldValue, Table, Text};

/// Milliseconds since last boot
pub type SystemTime = u32;

/// Variable-length data size
pub type Size = u16;

/// Table identifier
pub type TableId = u16;

/// Field identifier
pub type FieldId = u16;
