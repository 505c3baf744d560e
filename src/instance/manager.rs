// src/instance/manager.rs

//! The per-region cloud-instance capability (spec.md §4.E). A concrete
//! implementation wraps a cloud SDK; that wrapper is an external
//! collaborator (spec.md §1) and is not part of this crate.

use async_trait::async_trait;

use crate::core::ControllerError;

/// Identifiers a freshly created, created-but-dormant instance carries
/// (spec.md §4.E `CreateInstance`).
#[derive(Debug, Clone)]
pub struct CreatedInstance {
    pub instance_id: String,
    pub allocation_id: String,
    pub public_ip: String,
}

/// The association id produced by binding an elastic address to a
/// running instance (spec.md §4.E `MakeInstanceAvailable`).
#[derive(Debug, Clone)]
pub struct MadeAvailable {
    pub association_id: String,
}

/// All calls are synchronous: each blocks until the underlying cloud
/// primitive reaches a stable state (spec.md §4.E "system-status ok /
/// stopped / associated / disassociated").
#[async_trait]
pub trait InstanceManager: Send + Sync + std::fmt::Debug {
    /// Creates an instance of `kind`, waits for system-status ok, stops
    /// it, and allocates an elastic address — producing a
    /// created-but-dormant instance ready for `StartInstance`
    /// (spec.md §4.E).
    async fn create_instance(&self, kind: &str) -> Result<CreatedInstance, ControllerError>;

    /// Starts the instance with the rendered user-data script.
    async fn start_instance(&self, instance_id: &str, user_data: &str) -> Result<(), ControllerError>;

    /// Stops the instance; blocks until system-status is stopped.
    async fn stop_instance(&self, instance_id: &str) -> Result<(), ControllerError>;

    /// Associates `allocation_id`'s elastic address with `instance_id`.
    async fn make_instance_available(
        &self,
        instance_id: &str,
        allocation_id: &str,
    ) -> Result<MadeAvailable, ControllerError>;

    /// Disassociates the elastic address bound by `association_id`.
    async fn make_instance_unavailable(&self, association_id: &str) -> Result<(), ControllerError>;
}
