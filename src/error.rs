use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Image loading failed: {0}")]
    Image(#[from] ImageError),

    #[error("Resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Image {0} is already registered")]
    DuplicateImage(String),

    #[error("Cache verification failed: {0}")]
    Verification(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ImageError {
    #[error("IO error reading {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid format in {location}: {message}")]
    InvalidFormat { location: String, message: String },

    #[error("{location}: {table} entry {entry} refers to {target} index {index}, but there are only {count}")]
    IndexOutOfBounds {
        location: String,
        table: &'static str,
        entry: usize,
        target: &'static str,
        index: u32,
        count: u32,
    },

    #[error("{location}: {table} table has {count} entries, more than an index can address")]
    TableTooLarge {
        location: String,
        table: &'static str,
        count: usize,
    },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("No class definition found for {0}")]
    NoClassDefFound(String),

    #[error("No method {class}.{name}{signature}")]
    NoSuchMethod {
        class: String,
        name: String,
        signature: String,
    },

    #[error("No field {class}.{name}:{type_descriptor}")]
    NoSuchField {
        class: String,
        name: String,
        type_descriptor: String,
    },
}
