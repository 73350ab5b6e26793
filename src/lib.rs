pub mod app;
pub mod batch;
pub mod cdd;
pub mod config;
pub mod domain;
pub mod error;
pub mod microbes_online;
pub mod output;
pub mod reshape;
pub mod table;
