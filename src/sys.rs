pub mod executor;
pub mod headless;
pub mod platform;
