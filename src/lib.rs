pub mod api;
pub mod build;
pub mod config;
pub mod docker;
pub mod registry;
pub mod relay;
pub mod service;
