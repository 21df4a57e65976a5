#![deny(clippy::unwrap_used)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

mod client;
mod conversation;
mod error;
mod messages;
mod response_parser;

pub use client::*;
pub use conversation::*;
pub use error::*;
pub use messages::*;
pub use response_parser::*;
