#![forbid(unsafe_code)]

pub mod calibre;
pub mod catalog;
pub mod catalog_sync;
pub mod cli;
pub mod collect;
pub mod config;
pub mod converter;
pub mod logging;
pub mod metadata;
pub mod origin;
pub mod outcome;
pub mod process;
pub mod provider;
pub mod retry_file;
pub mod session;
pub mod update;
pub mod watermark;
pub mod work_url;
