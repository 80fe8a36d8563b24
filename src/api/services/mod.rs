//! Services module - business logic behind the routes.

pub mod auth_adapter;
pub mod auth_service;
pub mod delta_resolver;
pub mod dependency_inference;
pub mod event_sync;
pub mod expression;
pub mod flow_runner;
pub mod har_importer;
pub mod jwt_service;
pub mod request_executor;
pub mod script;
pub mod template;
pub mod workspace_bundle;

// Re-export for convenience
pub use auth_adapter::{AdapterError, AdapterRequest, AuthAdapter};
pub use auth_service::{AuthService, AuthServiceError};
pub use event_sync::{EventBatch, EventStreamer, SyncEvent, SyncTopic};
pub use flow_runner::{FlowRunner, RunOptions, RunSummary};
pub use jwt_service::{AuthenticatedUser, JwtService, SharedJwtService};
pub use request_executor::RequestExecutor;
