//! LMS features built on the sync layer.

pub mod api_types;
mod types;
mod use_cases;

pub use types::{Assignment, Course, Plannable};
pub use use_cases::{GetAssignments, GetCourses, GetPlannables, IgnoreTodo};
