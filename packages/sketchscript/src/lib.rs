pub mod config;
pub mod output;
pub mod canvas;
pub mod canvas_rhai;
pub mod raster;

// Script core
pub mod scope;
pub mod script_diagnostics;
pub mod callbacks;
pub mod runner;
pub mod animator_cache;
pub mod scheduler;
pub mod containment;
pub mod history;
pub mod session;

// Console front end
pub mod console;
pub mod sections;

pub mod cli;
