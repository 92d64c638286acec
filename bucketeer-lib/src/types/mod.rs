#![allow(unreachable_pub)]

mod credential;
mod error;
mod request;
mod response;

pub use credential::Credential;
pub use error::{ErrorClass, ErrorKind};
pub use request::{FileAttachment, RequestOptions};
pub use response::ResponseBody;

/// The bucketeer `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
