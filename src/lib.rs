//! Records which window has focus and how many keys were pressed, and keeps it in a local DuckDB
//! file so the day can be reviewed later. Activity is grouped into logical days that start at a
//! configurable hour, so late nights count towards the day they started on.
//!

pub mod cli;
pub mod daemon;
pub mod utils;
pub mod window_api;
