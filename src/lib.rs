#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod alloc;
pub mod cli;
pub mod codec;
pub mod entry;
pub mod error;
pub mod import;
pub mod index;
pub mod maintain;
pub mod superblock;
pub mod util;
pub mod volume;
