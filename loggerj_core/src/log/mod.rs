//! A log is a sequence of segments, each segment pairs a store file holding the raw records with
//! an offset index locating them.
pub mod log_config;
pub mod offset_index;

pub use log_config::Config;
pub use offset_index::{IndexError, IndexSlot, OffsetIndex, OffsetPosition};
