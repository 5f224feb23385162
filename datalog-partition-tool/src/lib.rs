pub mod csv_writer;
pub mod error;
pub mod parser;
pub mod types;

pub use csv_writer::write_csv;
pub use error::Error;
pub use parser::parse_image;
pub use types::*;

pub type Result<T> = std::result::Result<T, Error>;
