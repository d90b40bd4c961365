//! Command-line front end

pub mod args;
pub mod slice;

pub use args::{SliceCliArgs, SliceCliError, USAGE};
pub use slice::run_slice_cli;
