//! Handlers 模块

pub mod polling;

pub use polling::*;
