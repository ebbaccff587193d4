// Startup configuration and encryption key validation
pub mod config;

// Error taxonomy
pub mod error;

// AES-256-GCM token encryption
pub mod crypto;

// Broker provider registry
pub mod provider;

// Caller-owned session state
pub mod session;

// Authorization code and refresh flows
pub mod oauth;

// Encrypted token persistence
pub mod store;
