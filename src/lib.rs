pub mod cli;
pub mod command;
pub mod config;
pub mod handler;
pub mod localization;
pub mod playback;
pub mod supervisor;
