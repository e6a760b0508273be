use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MimeError {
    #[error("invalid header: {0}")]
    HeaderParse(String),
    #[error("structural anomaly: {0}")]
    Structure(String),
    #[error("unknown content-transfer-encoding: {0}")]
    UnknownTransferEncoding(String),
    #[error("unsupported charset: {0}")]
    UnsupportedCharset(String),
    #[error("invalid header flags: {0}")]
    InvalidHeaderFlags(String),
    #[error("invalid part id: {0}")]
    InvalidPartId(String),
    #[error("read error while pumping parser input: {0}")]
    Read(String),
}
