//! Identifier generation for threads and checkpoints.

use uuid::Uuid;

/// Generates the random identifiers the engine hands out: checkpoint
/// ids and ephemeral thread ids. Task ids are *not* generated here;
/// they are content-addressed (see [`crate::types::task_id`]).
#[derive(Debug, Default, Clone, Copy)]
pub struct IdGenerator;

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Fresh checkpoint id.
    #[must_use]
    pub fn generate_checkpoint_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Thread id for one-off runs that still want persistence.
    #[must_use]
    pub fn generate_thread_id(&self) -> String {
        format!("thread-{}", Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let generator = IdGenerator::new();
        assert_ne!(
            generator.generate_checkpoint_id(),
            generator.generate_checkpoint_id()
        );
        assert!(generator.generate_thread_id().starts_with("thread-"));
    }
}
