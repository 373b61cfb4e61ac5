pub mod args;
pub mod artifact;
pub mod classify;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod precheck;
pub mod report;
pub mod util;
