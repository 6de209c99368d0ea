// Registry constants (no magic values)

/// First line of the INFO_LOG block published when provisioning fails
pub const CLONE_ERROR_HEADER: &str = "===== Clone Error =====";

/// First line of the INFO_LOG block published when the worker cannot be
/// constructed after a successful clone
pub const SPAWN_ERROR_HEADER: &str = "===== Spawn Error =====";
