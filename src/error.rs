use derive_more::{Display, From};

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Display, From)]
pub enum Error {
    // -- Segmentation
    #[display("segmentation failed: {_0}")]
    Segmentation(String),
    #[display("segmentation exceeded deadline of {_0} ms")]
    SegmentationTimeout(u64),

    // -- Catalog
    #[display("catalog image {_0} could not be read")]
    MissingInput(String),

    // -- Config
    #[display("invalid configuration: {_0}")]
    Config(String),

    // -- Externals
    #[from]
    #[display("I/O error: {_0}")]
    Io(std::io::Error),
    #[from]
    #[display("image error: {_0}")]
    Image(image::error::ImageError),
    #[from]
    #[display("PNG encoding error: {_0}")]
    Png(png::EncodingError),
    #[from]
    #[display("JSON error: {_0}")]
    Json(serde_json::Error),
    #[from]
    #[display("invalid glob pattern: {_0}")]
    Pattern(glob::PatternError),
    #[from]
    #[display("glob error: {_0}")]
    Glob(glob::GlobError),
    #[from]
    #[display("worker pool error: {_0}")]
    ThreadPool(rayon::ThreadPoolBuildError),
}

impl std::error::Error for Error {}

impl Error {
    /// Failures that only degrade one image instead of aborting the request
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Segmentation(_) | Error::SegmentationTimeout(_) | Error::MissingInput(_)
        )
    }
}
