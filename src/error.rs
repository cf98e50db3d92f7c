use std::path::PathBuf;

/// Errors raised while assembling an evaluator. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown network version {0}")]
    UnknownVersion(u32),

    #[error("{stage}: {detail}")]
    Partition { stage: &'static str, detail: String },

    #[error("{stage}: output length {output} cannot hold {groups} pooled groups")]
    OutputTooSmall {
        stage: &'static str,
        output: usize,
        groups: usize,
    },

    #[error("{stage}: expected input of size {expected}, found {found}")]
    ShapeMismatch {
        stage: String,
        expected: usize,
        found: usize,
    },

    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}

impl ConfigError {
    pub(crate) fn shape(stage: impl Into<String>, expected: usize, found: usize) -> Self {
        ConfigError::ShapeMismatch {
            stage: stage.into(),
            expected,
            found,
        }
    }
}

/// Errors raised by a single evaluation call.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("board encoding has shape {found:?}, expected {expected:?}")]
    EncodingShape {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("valid-action mask has shape {found:?}, expected {expected:?}")]
    MaskShape {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("batch row {row} has no legal action")]
    NoLegalAction { row: usize },

    #[error("{0} input does not match the pipeline layout")]
    LayoutMismatch(&'static str),

    #[error("failed to read back tensor data: {0}")]
    Readback(String),
}

/// Errors raised while encoding or decoding the weight blob.
#[derive(Debug, thiserror::Error)]
pub enum WeightsError {
    #[error("failed to save weights: {0}")]
    Save(String),

    #[error("failed to load weights: {0}")]
    Load(String),

    #[error("weights were saved for network version {found}, expected {expected}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("weights hold {found} parameters, network has {expected}")]
    ParameterCount { expected: u64, found: u64 },
}
