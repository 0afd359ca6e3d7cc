//! Pending-identifier generation.

/// Mints pending-identifiers unique within the process lifetime.
///
/// The default implementation, [`UuidPidGenerator`], is almost always the
/// right choice; hosts that want sortable or shorter ids can supply their
/// own via [`crate::Callbacks::generate_pid`].
pub trait PidGenerator: Send + Sync + 'static {
    /// Returns a new, process-unique pid.
    fn generate(&self) -> String;
}

/// Generates pids from random UUIDv4s.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidPidGenerator;

impl PidGenerator for UuidPidGenerator {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}
