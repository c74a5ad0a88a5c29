use thiserror::Error;

/// Fatal problems with a CGM export that prevent any readings from being
/// produced.
///
/// Individual malformed rows are never reported here; they are dropped and
/// counted in the parse statistics instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The input text is empty or whitespace only.
    #[error("CSV file is empty")]
    Empty,

    /// The first data row has fewer columns than the canonical layout and no
    /// usable header row was found.
    #[error("Invalid CSV format: expected at least {expected} columns, found {found}")]
    TooFewColumns { expected: usize, found: usize },

    /// A header row was found but it lacks one or more mandatory columns.
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// Every candidate row was rejected.
    #[error("No valid glucose data found: checked {checked} rows, all were invalid")]
    NoValidRows { checked: usize },
}

/// All errors produced by the glucose engine.
#[derive(Error, Debug)]
pub enum GlucoseError {
    /// The export could not be parsed at all.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// A workday list contained no recognisable dates.
    #[error("Could not parse workdays: {0}")]
    Workdays(String),
}

/// Convenience alias used throughout the glucose crates.
pub type Result<T> = std::result::Result<T, GlucoseError>;
