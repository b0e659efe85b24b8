use std::any::Any;
use std::fmt;

/// Monotonically assigned task identifier, unique within one pool instance.
/// Ids start at 1 and are never reused; 0 means "no task".
pub type TaskId = u64;

/// The opaque argument handed to a task's work function. Ownership passes to
/// the pool on submission, to the work function on dispatch, and back to the
/// caller on cancellation.
pub type TaskArg = Box<dyn Any + Send>;

pub(crate) type TaskFn = Box<dyn FnOnce(TaskArg) + Send>;

/// Longest task name the pool stores, in bytes. Longer caller-supplied names
/// are truncated on a UTF-8 boundary.
pub const MAX_TASK_NAME_LEN: usize = 63;

/// Dispatch priority. Lower value means dispatched earlier; the numeric gaps
/// leave room for intermediate tiers without a breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    High = 0,
    Normal = 5,
    Low = 10,
    Background = 15,
}

impl Priority {
    /// The numeric tag backing the ordering.
    pub fn value(self) -> u8 {
        self as u8
    }
}

/// Where a looked-up task currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskLocation {
    /// Still in the queue; cancellable.
    Queued,
    /// Executing on a worker; will run to completion.
    Running,
}

pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) priority: Priority,
    pub(crate) func: TaskFn,
    pub(crate) arg: TaskArg,
}

impl Task {
    pub(crate) fn into_cancelled(self) -> CancelledTask {
        CancelledTask {
            id: self.id,
            name: self.name,
            arg: self.arg,
        }
    }
}

/// A task removed from the queue before it ran. Carries the argument back to
/// the caller so its resources can be released or reused.
pub struct CancelledTask {
    pub id: TaskId,
    pub name: String,
    pub arg: TaskArg,
}

impl fmt::Debug for CancelledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelledTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Clamp a caller-supplied name to the stored capacity without splitting a
/// multi-byte character.
pub(crate) fn clamp_name(raw: &str) -> String {
    if raw.len() <= MAX_TASK_NAME_LEN {
        return raw.to_string();
    }
    let mut end = MAX_TASK_NAME_LEN;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    raw[..end].to_string()
}

pub(crate) fn unnamed_name(id: TaskId) -> String {
    format!("unnamed_task_{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_values_are_ordered() {
        assert_eq!(Priority::High.value(), 0);
        assert_eq!(Priority::Normal.value(), 5);
        assert_eq!(Priority::Low.value(), 10);
        assert_eq!(Priority::Background.value(), 15);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert!(Priority::Low < Priority::Background);
    }

    #[test]
    fn short_names_pass_through() {
        assert_eq!(clamp_name("compact"), "compact");
        assert_eq!(clamp_name(&"a".repeat(MAX_TASK_NAME_LEN)).len(), MAX_TASK_NAME_LEN);
    }

    #[test]
    fn long_names_truncate_at_capacity() {
        let long = "b".repeat(200);
        let clamped = clamp_name(&long);
        assert_eq!(clamped.len(), MAX_TASK_NAME_LEN);
        assert_eq!(clamped, "b".repeat(MAX_TASK_NAME_LEN));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 'é' is two bytes; byte 63 falls mid-character, so the whole
        // character is dropped rather than split
        let name = format!("{}é", "a".repeat(62));
        let clamped = clamp_name(&name);
        assert_eq!(clamped, "a".repeat(62));
        assert!(clamped.len() <= MAX_TASK_NAME_LEN);
    }

    #[test]
    fn synthesized_names_embed_the_id() {
        assert_eq!(unnamed_name(7), "unnamed_task_7");
        assert_eq!(unnamed_name(41), "unnamed_task_41");
    }
}
