/// Timer queue driving the engine: periodic clock ticks, arp sub-ticks and
/// deferred note-offs, all ordered by due time on one execution context.
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Step clock tick; ignored unless `token` is still armed.
    Tick { token: u64 },
    /// Held-note arpeggiator tick; ignored unless `token` is still armed.
    ArpTick { token: u64 },
    /// Sound `pitches` now and release them after `gate`.
    Strike { pitches: Vec<u8>, gate: Duration },
    NoteOff { pitch: u8 },
}

#[derive(Debug)]
struct Entry {
    due: Duration,
    seq: u64,
    task: Task,
}

// Min-heap on (due, seq): equal due times run in scheduling order.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

/// Deferred actions keyed by time since the engine epoch.
///
/// Nothing here is ever removed early. Periodic actions are cancelled through
/// [`Periodic`] tokens; one-shots always run at their scheduled time.
#[derive(Debug, Default)]
pub struct Scheduler {
    queue: BinaryHeap<Entry>,
    seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due: Duration, task: Task) {
        self.seq += 1;
        self.queue.push(Entry {
            due,
            seq: self.seq,
            task,
        });
    }

    /// Removes and returns the earliest task due at or before `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<(Duration, Task)> {
        if self.queue.peek()?.due > now {
            return None;
        }
        self.queue.pop().map(|entry| (entry.due, entry.task))
    }

    pub fn next_due(&self) -> Option<Duration> {
        self.queue.peek().map(|entry| entry.due)
    }

}

/// Cancellation handle for a repeating task. Re-arming issues a new token, so
/// ticks queued under an old token fall through when they come due.
#[derive(Debug, Default)]
pub struct Periodic {
    current: Option<u64>,
    issued: u64,
}

impl Periodic {
    pub fn arm(&mut self) -> u64 {
        self.issued += 1;
        self.current = Some(self.issued);
        self.issued
    }

    pub fn cancel(&mut self) {
        self.current = None;
    }

    pub fn is_armed(&self) -> bool {
        self.current.is_some()
    }

    pub fn is_current(&self, token: u64) -> bool {
        self.current == Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_pops_in_due_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(ms(30), Task::NoteOff { pitch: 3 });
        scheduler.schedule(ms(10), Task::NoteOff { pitch: 1 });
        scheduler.schedule(ms(20), Task::NoteOff { pitch: 2 });

        assert_eq!(scheduler.next_due(), Some(ms(10)));
        assert_eq!(
            scheduler.pop_due(ms(25)),
            Some((ms(10), Task::NoteOff { pitch: 1 }))
        );
        assert_eq!(
            scheduler.pop_due(ms(25)),
            Some((ms(20), Task::NoteOff { pitch: 2 }))
        );
        assert_eq!(scheduler.pop_due(ms(25)), None);
        assert_eq!(scheduler.next_due(), Some(ms(30)));
    }

    #[test]
    fn test_equal_due_times_keep_insertion_order() {
        let mut scheduler = Scheduler::new();
        for pitch in [5, 1, 9] {
            scheduler.schedule(ms(0), Task::NoteOff { pitch });
        }
        let order: Vec<_> = std::iter::from_fn(|| scheduler.pop_due(ms(0)))
            .map(|(_, task)| task)
            .collect();
        assert_eq!(
            order,
            vec![
                Task::NoteOff { pitch: 5 },
                Task::NoteOff { pitch: 1 },
                Task::NoteOff { pitch: 9 },
            ]
        );
    }

    #[test]
    fn test_rearm_invalidates_old_token() {
        let mut periodic = Periodic::default();
        assert!(!periodic.is_armed());
        let first = periodic.arm();
        let second = periodic.arm();
        assert!(!periodic.is_current(first));
        assert!(periodic.is_current(second));
        periodic.cancel();
        assert!(!periodic.is_current(second));
    }
}
