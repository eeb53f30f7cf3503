use std::io::{self, Read, Write};

/// The application state being replicated.
///
/// Every peer applies the same changes in the same order, so `apply_change` must be deterministic:
/// the same starting state and the same change always produce the same resulting state. Changes
/// are opaque bytes to the replication layer.
pub trait MetaState: Send + 'static {
    fn apply_change(&mut self, change: &[u8]);

    /// Serializes the full state. Two peers at the same version must produce identical bytes,
    /// since snapshot checksums are compared across the cell.
    fn save(&self, output: &mut dyn Write) -> io::Result<()>;

    /// Replaces the state with one previously written by `save`.
    fn load(&mut self, input: &mut dyn Read) -> io::Result<()>;

    /// Resets to the empty initial state.
    fn clear(&mut self);
}
