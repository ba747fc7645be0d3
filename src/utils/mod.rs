pub mod json;
pub mod size;
