pub mod face;
pub mod image;
pub mod job;
