#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod batch;
pub mod cli;
pub mod config;
pub mod decode;
pub mod directory;
pub mod error;
pub mod exec;
pub mod hyperv;
pub mod logging;
pub mod paths;
pub mod progress;
pub mod report;
pub mod target;
pub mod util;
pub mod workspace;
