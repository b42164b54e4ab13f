pub mod clock;
pub mod color;
pub mod scenario;
pub mod compress;
pub mod command;
pub mod controller;
pub mod config;

// Scripting
pub mod bridge;
pub mod scripting;
pub mod script_diagnostics;
pub mod script_log;

// Playback
pub mod dispatch;
pub mod recorder;
pub mod export;

pub mod cli;
