pub mod bootstrap;
pub mod commands;
pub mod queries;
pub mod runner;
