pub mod config;
pub mod error;
pub mod excel;
pub mod moodle;
pub mod wire;
