#![forbid(unsafe_code)]
//! Filesystem, glob, and process helpers for Smelt.

pub mod error;
pub mod fs;
pub mod process;
