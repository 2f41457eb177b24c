pub mod attendees;
pub mod audit;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod scheduler;
pub mod workshops;

pub use error::{ApiError, ErrorResponse};
pub use routes::create_router;
