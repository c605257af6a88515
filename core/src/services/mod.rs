pub mod broadcast;
pub mod log;
