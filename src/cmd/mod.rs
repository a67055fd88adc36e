//! Command-line entry points.

pub mod grade;
pub mod history;
pub mod schema;
pub mod serve;
