pub mod bots;
pub mod links;
pub mod routes;
