pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod sse;

pub use server::start_server;
