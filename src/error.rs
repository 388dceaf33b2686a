use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SfsError {
    #[error("not an SFS volume: bad magic in superblock")]
    #[diagnostic(help("check that the file is an SFS image (e.g. one made by `sfs create`)"))]
    NotAnSfsVolume,

    #[error("corrupt volume: {reason}")]
    Corrupt { reason: String },

    #[error("no such file or directory: {path}")]
    NotFound { path: String },

    #[error("path already exists: {path}")]
    AlreadyExists { path: String },

    #[error("directory not empty: {path}")]
    NotEmpty { path: String },

    #[error("no space left on volume")]
    #[diagnostic(help("grow the image with `sfs resize`, or compact it with `sfs defrag`"))]
    NoSpace,

    #[error("malformed index entry at slot {slot}: {reason}")]
    MalformedEntry { slot: usize, reason: String },

    #[error("invalid size: {message}")]
    InvalidSize { message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}
