use thiserror::Error;

#[derive(Debug, Error)]
pub enum LUTError
{
    #[error("point lies outside the table domain")]
    OutOfDomain,
    #[error("table dimension {found} is outside 1..={max}")]
    InvalidDimension { found: usize, max: usize },
    #[error("expected {expected} coordinates, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("invalid box id {0}")]
    InvalidBox(usize),
    #[error("invalid corner handle {0}")]
    InvalidCorner(u32),
    #[error("box {0} has already been subdivided")]
    BoxNotLeaf(usize),
    #[error("box {0} has corners without evaluated data")]
    BoxNotEvaluated(usize),
    #[error("corner {0} already carries an evaluated value")]
    CornerAlreadyEvaluated(u32),
    #[error("parameter bounds [{lower}, {upper}] are empty")]
    InvalidBounds { lower: f64, upper: f64 },
    #[error("parameter `{0}` is already registered")]
    DuplicateParameter(String),
    #[error("table has only {0} dimensions")]
    TooManyParameters(usize),
    #[error("{found} of {expected} parameters registered")]
    ParametersIncomplete { expected: usize, found: usize },
    #[error("no quantities of interest registered")]
    NoQoisRegistered,
    #[error("invalid quantity of interest index {0}")]
    InvalidQoi(usize),
    #[error("table layout cannot change once generation has begun")]
    GenerationAlreadyBegun,
    #[error("generation has not begun")]
    GenerationNotStarted,
    #[error("evaluator returned {found} quantities of interest, expected {expected}")]
    QoiLengthMismatch { expected: usize, found: usize },
    #[error("evaluation failed: {0}")]
    EvaluationFailed(String),
    #[error("could not build worker pool: {0}")]
    ThreadPoolFailed(String),
    #[error("LZ4 decompression failed")]
    LZ4DecompressionFailed,
    #[error("serialization failed: {0}")]
    SerializationFailed(String),
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),
    #[error("archive version {found} is not supported (expected {expected})")]
    IncompatibleArchive { found: u32, expected: u32 },
    #[error("file I/O error: {0}")]
    FileIOError(#[from] std::io::Error),
}

impl LUTError
{
    pub fn evaluation_failed(msg: impl Into<String>) -> Self
    {
        Self::EvaluationFailed(msg.into())
    }
}
