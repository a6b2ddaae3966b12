//! Architecture-agnostic CPU functions.

/// Id of the current hart.
///
/// Must be called with interrupts disabled to
/// prevent a race with being moved to another hart.
/// Prefer [`InterruptBlocker::cpu_id`](super::trap::InterruptBlocker::cpu_id).
pub fn cpu_id() -> usize {
    super::platform().cpu_id()
}
