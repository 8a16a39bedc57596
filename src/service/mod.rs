pub mod probe;
pub mod status;
