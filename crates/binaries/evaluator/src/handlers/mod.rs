pub mod compare;
pub mod converse;
pub mod evaluate;
pub mod map;
pub mod merge;

mod folder;
mod json_file;
