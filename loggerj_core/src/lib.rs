#![warn(rust_2018_idioms)]
//! Storage core of a segmented, append-only record log.

pub mod common;
pub mod log;
