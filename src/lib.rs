pub mod aggregate;
pub mod archive;
pub mod config;
pub mod db;
pub mod downloader;
pub mod error;
pub mod parser;
pub mod pipeline;
pub mod stations;
