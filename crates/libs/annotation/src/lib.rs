#![deny(clippy::unwrap_used)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

mod compare;
mod mapper;
mod ordering;
mod vocabulary;
mod vote;

pub use compare::*;
pub use mapper::*;
pub use ordering::*;
pub use vocabulary::*;
pub use vote::*;
