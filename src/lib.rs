// Infrastructure layer (shared components)
pub mod infrastructure;

// Re-export infrastructure modules for shorter paths
pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::metrics;
pub use infrastructure::redis;

// Domain layer
pub mod connection_manager;
pub mod rooms;
pub mod session;

// Application layer
pub mod api;
pub mod broker;
pub mod chat;
pub mod server;
pub mod websocket;
