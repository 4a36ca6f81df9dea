//! Host graph formats.

pub mod graphdef;

pub use graphdef::from_json;
