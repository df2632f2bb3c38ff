pub mod audience;
pub mod dto;
pub mod processor;
pub mod routes;
pub mod service;
pub mod winner;
