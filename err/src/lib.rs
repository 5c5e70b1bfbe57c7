#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(IoError),
    #[error("FS: {0}")]
    Fs(FsError),
}

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error("Cannot open disk image: {0}")]
    Open(std::io::Error),
    #[error("Cannot map disk image: {0}")]
    Map(std::io::Error),
    #[error("Access of {len} bytes at offset {offset} runs past the end of the image ({size} bytes)")]
    OutOfBounds { offset: u64, len: usize, size: u64 },
}

#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("Inconsistent")]
    Inconsistent,
}

pub type Result<T> = core::result::Result<T, Error>;
