pub mod buffer;
pub mod capture;
pub mod cli;
pub mod config;
pub mod pipeline;
pub mod record;
pub mod storage;
pub mod tail;
pub mod upload;
