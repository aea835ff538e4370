use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("found no file at path")]
    NotFound,
    #[error("a file with that name already exists")]
    AlreadyExists,
    #[error("not enough free sectors")]
    NoSpace,
    #[error("directory has no free entry")]
    DirectoryFull,
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("path component is not a directory")]
    NotADirectory,
    #[error("directory is not empty, remove it recursively")]
    LeafMismatch,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("open file table is full")]
    TooManyOpenFiles,
    #[error("disk i/o failed")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;
