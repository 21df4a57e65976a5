#![deny(clippy::unwrap_used)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

mod answer_schema;
mod evaluation;
mod image;
mod record;

pub use answer_schema::*;
pub use evaluation::*;
pub use image::*;
pub use record::*;
