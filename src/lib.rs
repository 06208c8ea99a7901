pub mod tools;
pub mod matcher;
pub mod deflate;
pub mod inflate;
pub mod stream;

type DYNERR = Box<dyn std::error::Error>;
type STDRESULT = Result<(),Box<dyn std::error::Error>>;

/// Stream Errors
///
/// All the bitstream-format variants mean the same thing to a caller: the
/// compressed data is corrupt and the decoder instance cannot be reused.
/// The distinctions are kept for diagnostics only.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("unknown block type")]
    UnknownBlockType,
    #[error("invalid huffman data")]
    InvalidHuffmanData,
    #[error("stored block length check failed")]
    InvalidBlockLength,
    #[error("invalid compressed data")]
    InvalidData,
    #[error("compressed stream ended prematurely")]
    TruncatedStream,
    #[error("file format mismatch")]
    FileFormatMismatch,
    #[error("operation already in progress")]
    OperationInProgress,
    #[error("no operation in progress")]
    OperationNotStarted
}

/// Options controlling compression.
/// The thresholds are empirically tuned values, carried as options rather
/// than constants so callers can adjust them.
#[derive(Clone)]
pub struct Options {
    /// writes smaller than this go straight to the compressor, no probing
    pub small_data_cutoff: usize,
    /// how many bytes to feed the compressor per incompressibility probe
    pub probe_size: usize,
    /// fall back to stored blocks when compressed/raw exceeds this
    pub bad_ratio: f64
}

pub const STD_OPTIONS: Options = Options {
    small_data_cutoff: 256,
    probe_size: 3976,
    bad_ratio: 1.0
};
