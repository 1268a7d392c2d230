pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;

pub use auth::{Claims, JwtError, JwtService};
pub use config::{AppConfig, ConfigError};
pub use error::ApiError;
pub use server::{AppState, ExamdeskServer, build_app};
