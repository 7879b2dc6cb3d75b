//! Utility functions shared by the reader and the writer.

mod math;

pub use math::{align_up, is_power_of_two, to_u32};
