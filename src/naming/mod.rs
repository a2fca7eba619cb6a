//! Naming Layer
//!
//! Turns recognized or operator-entered text into safe, unique file names.

pub mod manual;
pub mod planner;
pub mod sanitize;

pub use manual::{rename_in_place, ManualName, ManualOutcome, NameSuffix};
pub use planner::{plan_name, DuplicateIndex};
pub use sanitize::sanitize_and_upper;
