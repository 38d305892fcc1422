//! HTTP front end

pub mod routes;

pub use routes::build_router;
