#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod formats;
pub mod index;
pub mod logging;
pub mod orchestrate;
pub mod pipeline;
pub mod render;
pub mod resolve;
pub mod timing;
