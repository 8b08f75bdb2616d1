use super::*;

pub const FRAME_INTERVAL_MS: i64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    ShadowPoll(ObserverId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameTask {
    FlushMatches(ObserverId),
}

#[derive(Debug, Clone)]
pub(crate) struct ScheduledTask {
    pub(crate) due_at: i64,
    pub(crate) order: i64,
    pub(crate) interval_ms: Option<i64>,
    pub(crate) kind: TaskKind,
}

/// Virtual-clock task queue. Ties on `due_at` resolve by scheduling
/// order, so repeated runs are deterministic.
#[derive(Debug)]
pub(crate) struct Scheduler {
    pub(crate) now_ms: i64,
    tasks: Vec<ScheduledTask>,
    frame_queue: Vec<FrameTask>,
    next_task_order: i64,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            now_ms: 0,
            tasks: Vec::new(),
            frame_queue: Vec::new(),
            next_task_order: 0,
        }
    }

    fn allocate_order(&mut self) -> i64 {
        let order = self.next_task_order;
        self.next_task_order += 1;
        order
    }

    pub(crate) fn schedule(&mut self, delay_ms: i64, interval_ms: Option<i64>, kind: TaskKind) {
        let order = self.allocate_order();
        self.tasks.push(ScheduledTask {
            due_at: self.now_ms + delay_ms.max(0),
            order,
            interval_ms,
            kind,
        });
    }

    pub(crate) fn reschedule(&mut self, task: &ScheduledTask, interval_ms: i64) {
        let order = self.allocate_order();
        self.tasks.push(ScheduledTask {
            due_at: task.due_at + interval_ms.max(1),
            order,
            interval_ms: Some(interval_ms),
            kind: task.kind,
        });
    }

    pub(crate) fn cancel_observer_work(&mut self, observer: ObserverId) {
        self.tasks.retain(|task| match task.kind {
            TaskKind::ShadowPoll(id) => id != observer,
        });
        self.frame_queue.retain(|frame| match frame {
            FrameTask::FlushMatches(id) => *id != observer,
        });
    }

    pub(crate) fn pop_due(&mut self, limit_ms: i64) -> Option<ScheduledTask> {
        let mut best: Option<usize> = None;
        for (index, task) in self.tasks.iter().enumerate() {
            if task.due_at > limit_ms {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => {
                    let current = &self.tasks[current];
                    (task.due_at, task.order) < (current.due_at, current.order)
                }
            };
            if better {
                best = Some(index);
            }
        }
        best.map(|index| self.tasks.remove(index))
    }

    pub(crate) fn request_frame(&mut self, task: FrameTask) {
        self.frame_queue.push(task);
    }

    pub(crate) fn take_frame_tasks(&mut self) -> Vec<FrameTask> {
        std::mem::take(&mut self.frame_queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_tasks_pop_in_time_then_insertion_order() {
        let mut scheduler = Scheduler::new();
        let first = ObserverId(1);
        let second = ObserverId(2);
        let third = ObserverId(3);
        scheduler.schedule(50, None, TaskKind::ShadowPoll(first));
        scheduler.schedule(10, None, TaskKind::ShadowPoll(second));
        scheduler.schedule(10, None, TaskKind::ShadowPoll(third));

        let order: Vec<TaskKind> = std::iter::from_fn(|| scheduler.pop_due(100))
            .map(|task| task.kind)
            .collect();
        assert_eq!(
            order,
            vec![
                TaskKind::ShadowPoll(second),
                TaskKind::ShadowPoll(third),
                TaskKind::ShadowPoll(first),
            ]
        );
    }

    #[test]
    fn pop_due_respects_limit() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(500, Some(500), TaskKind::ShadowPoll(ObserverId(0)));
        assert!(scheduler.pop_due(499).is_none());
        let task = scheduler.pop_due(500);
        assert!(task.is_some());
        if let Some(task) = task {
            scheduler.reschedule(&task, 500);
        }
        assert!(scheduler.pop_due(999).is_none());
        assert!(scheduler.pop_due(1000).is_some());
    }

    #[test]
    fn cancel_removes_tasks_and_frames() {
        let mut scheduler = Scheduler::new();
        let target = ObserverId(7);
        let other = ObserverId(8);
        scheduler.schedule(100, Some(100), TaskKind::ShadowPoll(target));
        scheduler.schedule(100, Some(100), TaskKind::ShadowPoll(other));
        scheduler.request_frame(FrameTask::FlushMatches(target));
        scheduler.request_frame(FrameTask::FlushMatches(other));

        scheduler.cancel_observer_work(target);
        assert_eq!(
            scheduler.take_frame_tasks(),
            vec![FrameTask::FlushMatches(other)]
        );
        let remaining = scheduler.pop_due(1000);
        assert_eq!(
            remaining.map(|task| task.kind),
            Some(TaskKind::ShadowPoll(other))
        );
        assert!(scheduler.pop_due(1000).is_none());
    }
}
