use thiserror::Error;

/// Errors reported by log operations. Marked as non-exhaustive to allow for
/// future additions without breaking the API; a caller would typically only
/// need to handle `NoData` as the other errors are static.
#[derive(Error, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The partition must hold at least one whole block
    #[error("invalid partition size")]
    InvalidPartitionSize,

    /// The internal error value is returned from the partition adapter on a
    /// failed write or erase
    #[error("internal flash error")]
    FlashError,

    /// Entries may not straddle blocks, so one that cannot follow a block
    /// record within a single block can never be written
    #[error("entry too large")]
    EntryTooLarge,

    /// The requested block sequence is ahead of the current write block, or
    /// the log is recovering from an interrupted write
    #[error("no data")]
    NoData,

    /// Seek target lies outside the bound span
    #[error("seek out of range")]
    SeekOutOfRange,
}
