use thiserror::Error;

/// Errors surfaced by the statistics engine.
///
/// Only total unavailability of the source document (I/O failure or markup
/// that cannot be recovered into a root element) is fatal. Data-quality
/// problems inside an otherwise loadable document are handled by skipping
/// the affected record and never reach this type.
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, StatsError>;
