//! Task control blocks.

/// Task identifier; also the task's slot in the fixed table.
pub type TaskId = usize;

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    /// Slot empty or task finished; reusable (except PID 0).
    #[default]
    Dead,
    /// Currently executing. Exactly one task at any instant.
    Running,
    /// Runnable, waiting for its turn.
    Ready,
    /// Parked on a synchronization primitive.
    Blocked,
}

/// One entry of the task table.
#[derive(Debug, Clone, Copy)]
pub struct Task {
    pub id: TaskId,
    pub state: TaskState,
    pub name: &'static str,
    /// Saved stack pointer: the address of the task's register frame,
    /// captured when it was last interrupted (or built at creation).
    pub stack_ptr: u64,
    /// Base of the task's own stack frame. Zero for tasks that run on a
    /// borrowed stack (the idle task keeps the boot stack).
    pub stack_base: u64,
}

impl Task {
    pub const fn empty() -> Self {
        Self {
            id: 0,
            state: TaskState::Dead,
            name: "",
            stack_ptr: 0,
            stack_base: 0,
        }
    }
}
