//! Request handlers, grouped by surface.

pub mod grupos;
pub mod scan;
pub mod stats;
