pub mod application;
pub mod archive;
pub mod commands;
pub mod error;
pub mod interrupt;
pub mod manifest;
pub mod product;
pub mod progress;
pub mod registry;
pub mod removal;
pub mod runtime;
