#![deny(clippy::unwrap_used)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc
)]

//! Image preparation for multimodal chat requests.
//!
//! Images are read from disk or fetched over HTTP, then either re-encoded as bounded-size
//! JPEG (the default) or passed through untouched with a sniffed MIME type. Decoding and
//! resizing run on the blocking thread pool.

mod codec;
mod error;
mod mime;
mod source;

pub use codec::*;
pub use error::*;
pub use mime::*;
pub use source::*;
