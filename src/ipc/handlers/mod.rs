pub mod bulletins;
pub mod catalog;
pub mod core;
pub mod enrollments;
pub mod promotion;
pub mod ranking;
pub mod setup;
