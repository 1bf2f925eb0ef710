pub mod catalog;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod handlers;
pub mod pipeline;
pub mod selector;
pub mod store;
pub mod sweeper;
pub mod ytdlp;
