// lib.rs - Main library file that exports all modules
pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod models;
pub mod report;
pub mod session;
pub mod video_ref;

// Re-export commonly used types for convenience
pub use auth::{AuthSession, Identity};
pub use config::ClientConfig;
pub use error::{AuthError, GatewayError, SessionError};
pub use gateway::{AnalysisGateway, EventStream, HttpGateway};
pub use models::*;
pub use report::{Gated, ReportView, Unlock};
pub use session::{LogEntry, Phase, Session, SessionSnapshot, SessionStore, Severity, StreamReconciler};
pub use video_ref::extract_video_id;
