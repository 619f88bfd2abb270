pub mod client;
pub mod config;
pub mod router;


pub use client::GradeClient;
pub use router::{create_router, AppState};
