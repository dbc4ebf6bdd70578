//! Tick-driven preemptive round-robin scheduler.
//!
//! A fixed table of tasks; PID 0 is the idle task, created at init from
//! the boot context and never destroyed. Preemption happens only at
//! timer-interrupt boundaries: the dispatch layer hands [`schedule`]
//! the interrupted context's stack pointer and reloads whatever stack
//! pointer comes back.
//!
//! A task that exits goes `Dead` in place. Its slot and stack are
//! reclaimed lazily by the next [`create_task`] that recycles the slot.

pub mod task;

use core::ptr::NonNull;

pub use task::{Task, TaskId, TaskState};

use crate::arch::x86_64::context::PtRegs;
use crate::arch::x86_64::gdt;
use crate::config::MAX_TASKS;
use crate::error::{KernelError, KernelResult};
use crate::mm::{self, PAGE_SIZE};
use crate::sync::IrqSpinLock;

pub struct Scheduler {
    tasks: [Task; MAX_TASKS],
    current: TaskId,
    /// One past the highest slot ever handed out.
    highest: usize,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            tasks: [Task::empty(); MAX_TASKS],
            current: 0,
            highest: 0,
        }
    }

    /// Reset the table and install the idle task as PID 0, running on
    /// the current (boot) stack.
    pub fn init(&mut self) {
        self.tasks = [Task::empty(); MAX_TASKS];
        let idle = &mut self.tasks[0];
        idle.id = 0;
        idle.name = "idle";
        idle.state = TaskState::Running;
        self.current = 0;
        self.highest = 1;
    }

    pub fn current_id(&self) -> TaskId {
        self.current
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        (id < self.highest).then(|| &self.tasks[id])
    }

    /// Slot for a new task: the first dead slot (PID 0 excluded), or a
    /// fresh one. The bool is true for a fresh slot.
    fn find_slot(&self) -> Option<(TaskId, bool)> {
        for id in 1..self.highest {
            if self.tasks[id].state == TaskState::Dead {
                return Some((id, false));
            }
        }
        (self.highest < MAX_TASKS).then_some((self.highest, true))
    }

    fn release_stack(stack_base: u64) {
        let mut allocator = mm::FRAME_ALLOCATOR.lock();
        if let Some(page) = allocator.virt_to_page(stack_base as *const u8) {
            if let Err(err) = allocator.free_page(page) {
                pr_warn!("sched: stale stack free rejected: {:?}", err);
            }
        }
    }

    /// Create a task in `Ready` state.
    ///
    /// The task gets one frame as its stack. The top of the stack holds
    /// a return address pointing at [`task_exit`], so the entry function
    /// simply returning ends the task; below that sits the bootstrap
    /// register frame the first context switch restores.
    pub fn spawn(&mut self, name: &'static str, entry: extern "C" fn()) -> KernelResult<TaskId> {
        let (slot, fresh) = self.find_slot().ok_or(KernelError::ResourceExhausted {
            resource: "task table",
        })?;

        // Lazy reclamation of a recycled slot's old stack.
        if !fresh && self.tasks[slot].stack_base != 0 {
            Self::release_stack(self.tasks[slot].stack_base);
            self.tasks[slot].stack_base = 0;
        }

        let page = mm::alloc_page().map_err(|_| {
            pr_err!("sched: failed to create task '{}': out of memory", name);
            KernelError::OutOfMemory {
                requested: PAGE_SIZE,
            }
        })?;

        // SAFETY: the frame was just allocated for this stack.
        let stack_base = unsafe { page.as_ref() }.virt_addr() as u64;
        let stack_top = stack_base + PAGE_SIZE as u64;

        // Top of stack: falling off the end of `entry` returns into
        // task_exit.
        let ret_slot = stack_top - 8;
        // SAFETY: ret_slot lies inside the freshly allocated stack frame.
        unsafe {
            (ret_slot as *mut u64).write(task_exit as usize as u64);
        }

        let frame_addr = ret_slot - core::mem::size_of::<PtRegs>() as u64;
        let frame = PtRegs::new_kernel_task(
            entry as usize as u64,
            ret_slot,
            gdt::kernel_code_selector(),
            gdt::kernel_data_selector(),
        );
        // SAFETY: the frame sits inside the stack frame, below ret_slot.
        unsafe {
            (frame_addr as *mut PtRegs).write(frame);
        }

        if fresh {
            self.highest += 1;
        }
        self.tasks[slot] = Task {
            id: slot,
            state: TaskState::Ready,
            name,
            stack_ptr: frame_addr,
            stack_base,
        };

        pr_info!("sched: created task '{}' with PID {}", name, slot);
        Ok(slot)
    }

    /// Pick the next task. `current_sp` is the interrupted context's
    /// register-frame address; the return value is the frame address of
    /// whatever runs next (possibly the same task).
    ///
    /// Round-robin over `Ready` tasks starting after the current one,
    /// skipping the idle task; idle only runs when nothing else can.
    pub fn schedule(&mut self, current_sp: u64) -> u64 {
        if self.highest == 0 {
            // A tick before init: nothing to switch to.
            return current_sp;
        }
        self.tasks[self.current].stack_ptr = current_sp;
        if self.tasks[self.current].state == TaskState::Running {
            self.tasks[self.current].state = TaskState::Ready;
        }

        let mut next = self.current;
        for _ in 0..self.highest {
            next = (next + 1) % self.highest;
            if next == 0 {
                continue;
            }
            if self.tasks[next].state == TaskState::Ready {
                self.current = next;
                self.tasks[next].state = TaskState::Running;
                return self.tasks[next].stack_ptr;
            }
        }

        // Nothing else is runnable; fall back to idle.
        self.current = 0;
        self.tasks[0].state = TaskState::Running;
        self.tasks[0].stack_ptr
    }

    /// Mark the current task dead. The stack stays behind until the
    /// slot is recycled.
    fn exit_current(&mut self) {
        let id = self.current;
        self.tasks[id].state = TaskState::Dead;
        pr_debug!("sched: task '{}' (PID {}) exited", self.tasks[id].name, id);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

static SCHEDULER: IrqSpinLock<Scheduler> = IrqSpinLock::new(Scheduler::new());

/// Initialize the global scheduler with its idle task.
pub fn init() {
    SCHEDULER.lock().init();
    pr_info!("sched: initialized; idle task created with PID 0");
}

/// Create a kernel task. See [`Scheduler::spawn`].
pub fn create_task(name: &'static str, entry: extern "C" fn()) -> KernelResult<TaskId> {
    SCHEDULER.lock().spawn(name, entry)
}

/// Tick-driven scheduling decision; called from the interrupt dispatch.
pub fn schedule(current_sp: u64) -> u64 {
    SCHEDULER.lock().schedule(current_sp)
}

/// PID of the task currently marked Running.
pub fn current_task_id() -> TaskId {
    SCHEDULER.lock().current_id()
}

/// Terminal landing point of every task. Marks the task dead and parks
/// the CPU; the next timer tick schedules away and never comes back.
pub extern "C" fn task_exit() -> ! {
    SCHEDULER.lock().exit_current();
    loop {
        crate::arch::idle();
    }
}

/// Read back a task's register frame, for callers that need to inspect
/// a freshly created context.
pub fn task_frame(id: TaskId) -> Option<NonNull<PtRegs>> {
    let sched = SCHEDULER.lock();
    sched
        .task(id)
        .filter(|t| t.state != TaskState::Dead && t.stack_ptr != 0)
        .and_then(|t| NonNull::new(t.stack_ptr as *mut PtRegs))
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::mm::testing::global_mm;
    use std::collections::BTreeMap;
    use std::vec::Vec;

    extern "C" fn noop_entry() {}

    /// Instance scheduler with `n` synthetic ready tasks (besides idle).
    fn synthetic(n: usize) -> Scheduler {
        let mut s = Scheduler::new();
        s.init();
        for i in 1..=n {
            s.tasks[i] = Task {
                id: i,
                state: TaskState::Ready,
                name: "synthetic",
                stack_ptr: 0x1000 * i as u64,
                stack_base: 0,
            };
            s.highest = i + 1;
        }
        s
    }

    fn assert_single_running(s: &Scheduler) {
        let running = s.tasks[..s.highest]
            .iter()
            .filter(|t| t.state == TaskState::Running)
            .count();
        assert_eq!(running, 1, "exactly one task must be Running");
    }

    #[test]
    fn test_round_robin_fairness() {
        let n = 3;
        let mut s = synthetic(n);
        let mut selections: BTreeMap<TaskId, usize> = BTreeMap::new();

        let mut sp = 0xdead_0000;
        for _ in 0..10 * n {
            sp = s.schedule(sp);
            *selections.entry(s.current_id()).or_default() += 1;
            assert_single_running(&s);
        }

        for id in 1..=n {
            let picks = selections.get(&id).copied().unwrap_or(0);
            assert!(
                picks >= 5,
                "task {} selected {} times in {} ticks",
                id,
                picks,
                10 * n
            );
        }
    }

    #[test]
    fn test_idle_runs_only_when_nothing_is_ready() {
        let mut s = synthetic(2);

        // While others are ready, idle is skipped.
        let mut sp = 0xdead_0000;
        for _ in 0..10 {
            sp = s.schedule(sp);
            assert_ne!(s.current_id(), 0);
        }

        // Block both: idle takes over.
        s.tasks[1].state = TaskState::Blocked;
        s.tasks[2].state = TaskState::Blocked;
        sp = s.schedule(sp);
        assert_eq!(s.current_id(), 0);
        assert_eq!(s.tasks[0].state, TaskState::Running);

        // Unblock one: it preempts idle at the next tick.
        s.tasks[2].state = TaskState::Ready;
        let next_sp = s.schedule(sp);
        assert_eq!(s.current_id(), 2);
        assert_eq!(next_sp, s.tasks[2].stack_ptr);
        assert_eq!(s.tasks[0].state, TaskState::Ready);
    }

    #[test]
    fn test_schedule_saves_and_returns_stack_pointers() {
        let mut s = synthetic(2);

        // Idle is current; its sp gets saved, task 1 is selected.
        let sp = s.schedule(0xaaaa_0000);
        assert_eq!(s.tasks[0].stack_ptr, 0xaaaa_0000);
        assert_eq!(sp, 0x1000, "task 1's saved frame address");

        // Preempting task 1 stores its new sp and moves on to task 2.
        let sp = s.schedule(0xbbbb_0000);
        assert_eq!(s.tasks[1].stack_ptr, 0xbbbb_0000);
        assert_eq!(sp, 0x2000);
    }

    #[test]
    fn test_transitions_are_ready_running_only() {
        let n = 3;
        let mut s = synthetic(n);
        let mut sp = 0xdead_0000;
        let mut before: Vec<TaskState> = s.tasks[..s.highest].iter().map(|t| t.state).collect();

        for _ in 0..20 {
            sp = s.schedule(sp);
            let after: Vec<TaskState> = s.tasks[..s.highest].iter().map(|t| t.state).collect();
            for (b, a) in before.iter().zip(after.iter()) {
                let legal = matches!(
                    (b, a),
                    (TaskState::Ready, TaskState::Running)
                        | (TaskState::Running, TaskState::Ready)
                        | (TaskState::Ready, TaskState::Ready)
                        | (TaskState::Running, TaskState::Running)
                );
                assert!(legal, "illegal transition {:?} -> {:?}", b, a);
            }
            before = after;
        }
    }

    #[test]
    fn test_spawn_builds_bootstrap_frame() {
        let _mm = global_mm();
        let mut s = Scheduler::new();
        s.init();

        let id = s
            .spawn("frame-probe", noop_entry)
            .expect("task creation succeeds");
        let t = s.task(id).expect("created task is in the table");
        assert_eq!(t.state, TaskState::Ready);
        assert_ne!(t.stack_base, 0);

        // The saved stack pointer names a PtRegs frame just below the
        // task_exit return slot.
        let frame = t.stack_ptr as *const PtRegs;
        // SAFETY: spawn wrote the frame inside the task's own stack.
        let regs = unsafe { &*frame };
        assert_eq!(regs.rip, noop_entry as usize as u64);
        assert_eq!(regs.cs, gdt::kernel_code_selector() as u64);
        assert_eq!(regs.ss, gdt::kernel_data_selector() as u64);
        assert_eq!(regs.rflags & 0x200, 0x200, "tasks start with IF set");
        assert_eq!(regs.rsp, t.stack_ptr + core::mem::size_of::<PtRegs>() as u64);
        assert_eq!(
            regs.rsp,
            t.stack_base + PAGE_SIZE as u64 - 8,
            "rsp points at the task_exit return slot"
        );

        // The return slot holds task_exit's address.
        // SAFETY: regs.rsp is the initialized return slot in the stack.
        let ret = unsafe { *(regs.rsp as *const u64) };
        assert_eq!(ret, task_exit as usize as u64);

        // Clean up the stack frame.
        Scheduler::release_stack(t.stack_base);
    }

    #[test]
    fn test_dead_slot_reuse_reclaims_stack() {
        let _mm = global_mm();
        let mut s = Scheduler::new();
        s.init();

        let free_before = crate::mm::nr_free_pages();
        let first = s.spawn("short-lived", noop_entry).expect("creation succeeds");
        assert_eq!(crate::mm::nr_free_pages(), free_before - 1);

        // Simulate the task exiting.
        s.tasks[first].state = TaskState::Dead;

        // The next spawn recycles the slot and frees the stale stack, so
        // the net frame cost stays one stack.
        let second = s.spawn("recycled", noop_entry).expect("creation succeeds");
        assert_eq!(second, first, "dead slot is recycled");
        assert_eq!(crate::mm::nr_free_pages(), free_before - 1);

        let t = *s.task(second).expect("task exists");
        Scheduler::release_stack(t.stack_base);
    }

    #[test]
    fn test_table_exhaustion_fails_without_side_effects() {
        let _mm = global_mm();
        let mut s = Scheduler::new();
        s.init();

        let mut created = Vec::new();
        for _ in 1..MAX_TASKS {
            created.push(s.spawn("filler", noop_entry).expect("table has room"));
        }
        let free_after_fill = crate::mm::nr_free_pages();

        let err = s.spawn("one-too-many", noop_entry);
        assert!(matches!(err, Err(KernelError::ResourceExhausted { .. })));
        assert_eq!(crate::mm::nr_free_pages(), free_after_fill, "no stack leaked");

        for id in created {
            let t = *s.task(id).expect("task exists");
            Scheduler::release_stack(t.stack_base);
        }
    }

}
