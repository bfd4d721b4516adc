pub mod aggregate;
pub mod app;
pub mod config;
pub mod denovo;
pub mod domain;
pub mod error;
pub mod function;
pub mod input;
pub mod output;
pub mod project;
pub mod resolver;
pub mod row;
pub mod sample;
pub mod taxonomy;
