pub mod cache;
pub mod config;
pub mod connector;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod import;
pub mod mapping;
pub mod output;
pub mod progress;
pub mod reporter;
pub mod resolver;
pub mod rows;
pub mod samples;
pub mod store;
