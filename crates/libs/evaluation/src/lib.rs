#![deny(clippy::unwrap_used)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

mod batch;
mod evaluator;
mod io;
mod prompts;
mod retry;

pub use batch::*;
pub use evaluator::*;
pub use io::*;
pub use prompts::*;
pub use retry::*;
