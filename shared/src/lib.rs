pub mod http;
pub mod logger;
pub mod middleware;
pub mod server;
pub mod types;

#[cfg(test)]
mod tests;

pub use http::{retry_with_backoff, HttpClient, RemoteCallError, RetryConfig};
pub use types::{AggregateResult, StudentSummary};
