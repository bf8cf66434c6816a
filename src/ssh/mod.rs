pub mod dispatch;
pub mod rate_limit;
pub mod server;
pub mod session;

pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use server::start_ssh_server;
