//! Generation-checked handles for scheduled macrotasks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a scheduled macrotask.
///
/// A handle is a `{ index, generation }` pair: `index` names a slot in the
/// macrotask queue's arena and `generation` is bumped every time that slot is
/// released. A handle whose generation no longer matches its slot is stale and
/// is rejected by every queue operation.
///
/// # Examples
///
/// ```
/// use loop_types::TaskHandle;
///
/// let first = TaskHandle::new(3, 0);
/// let reused = TaskHandle::new(3, 1);
///
/// assert_eq!(first.index(), reused.index());
/// assert_ne!(first, reused);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle {
    index: u32,
    generation: u32,
}

impl TaskHandle {
    /// Creates a handle for `index` at `generation`.
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// The arena slot this handle points at.
    pub const fn index(self) -> u32 {
        self.index
    }

    /// The slot generation this handle was issued for.
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}v{}", self.index, self.generation)
    }
}

/// Which queue a unit of work belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Time-ordered work from the macrotask queue.
    Macrotask,
    /// FIFO work from the microtask queue.
    Microtask,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Macrotask => write!(f, "macrotask"),
            TaskKind::Microtask => write!(f, "microtask"),
        }
    }
}
