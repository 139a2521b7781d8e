pub mod config;
pub mod event;
pub mod handler;
pub mod model;
pub mod notify;
pub mod replicate;
pub mod runtime;
pub mod s3;
