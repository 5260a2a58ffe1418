use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pupils coincide; cannot derive a pixel scale")]
    PupilsCoincide,

    #[error("bisecting line crosses the polygon at {found} points, expected 2")]
    MalformedBisection { found: usize },

    #[error("detector error: {0}")]
    Detector(String),

    #[error("frame source error: {0}")]
    Source(String),

    #[error("'{0}' does not appear to be a valid facemetrics document")]
    InvalidDocument(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, FaceError>;
