pub mod config;
pub mod database;
pub mod memory;
pub mod repository;
pub mod router;
pub mod service;


pub use memory::InMemoryGradeStore;
pub use repository::{GradeStore, PgGradeStore};
pub use router::{create_router, AppState};
pub use service::{GradeError, GradeService};
