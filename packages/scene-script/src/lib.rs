pub mod binder;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod scene_graph;
pub mod scripting;
pub mod script_diagnostics;
pub mod script_log;
