//! # Realtime Chat
//!
//! The real-time delivery core of a chat backend:
//! - WebSocket gateway binding connections to verified identities
//! - Message queue buffering sends ahead of PostgreSQL persistence
//! - Room membership queue serializing joins and leaves
//! - Presence store and fan-out bus over Redis, with a local-only fallback
//!
//! ## Architecture
//!
//! The crate follows Clean Architecture principles:
//!
//! - **Domain Layer**: Entities, bus events, repository traits, reconciliation
//! - **Application Layer**: Queues, workers, token verification, persistence checks
//! - **Infrastructure Layer**: PostgreSQL repositories, coordination store, metrics
//! - **Presentation Layer**: WebSocket gateway, health and metrics routes
//!
//! ## Module Structure
//!
//! ```text
//! realtime_chat/
//! +-- config/         Configuration management
//! +-- domain/         Entities, events and repository traits
//! +-- application/    Queues, workers and services
//! +-- infrastructure/ Database, coordination store, metrics, health probes
//! +-- presentation/   WebSocket gateway and HTTP routes
//! +-- shared/         Common utilities (errors, snowflake IDs, validation)
//! ```

// Configuration module
pub mod config;

// Domain layer - Core rules
pub mod domain;

// Application layer - Queues and services
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - WebSocket gateway and HTTP routes
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
