pub mod builder;
pub mod compiler;
pub mod dto;
pub mod recompute;
pub mod routes;
pub mod schedule;
pub mod service;
