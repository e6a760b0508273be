mod decoder;
mod engine;
mod error;
mod extract;
mod header;
mod headermap;
mod nom_utils;
mod rfc5322;
mod scanner;
mod strings;

pub use error::MimeError;
pub type Result<T> = std::result::Result<T, MimeError>;

pub use decoder::*;
pub use engine::*;
pub use extract::*;
pub use header::{Header, HeaderFlags, HeaderParseResult, HeaderValue};
pub use headermap::*;
pub use rfc5322::*;
pub use strings::SharedString;
