//! Small shared utilities.

pub mod strings;

pub use strings::extract_by_label;
