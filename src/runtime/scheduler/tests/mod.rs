//! Scheduler 单元测试
//!
//! 测试任务类型、配置、闭锁和调度行为

use std::sync::Arc;

use crate::runtime::scheduler::context::Frame;
use crate::runtime::scheduler::{
    CountLatch, FlowScheduler, SchedulerConfig, Task, TaskId, TaskIdGenerator, TaskPriority,
    TaskState,
};


/// Small explicit pool with a short idle timeout.
pub(super) fn pool(workers: usize) -> FlowScheduler {
    FlowScheduler::with_config(SchedulerConfig::with_workers(workers)).unwrap()
}

/// A queued-only task that never runs; its frame belongs to `pool`.
pub(super) fn task(
    pool: &FlowScheduler,
    id: usize,
    priority: TaskPriority,
) -> Arc<Task> {
    Arc::new(Task::new(
        TaskId(id),
        format!("task-{id}"),
        priority,
        Frame::root(pool.core().clone()),
        Box::new(|| {}),
    ))
}

#[cfg(test)]
mod task_id_tests {
    use super::*;

    #[test]
    fn test_task_id_new() {
        let id = TaskId(1);
        assert_eq!(id.0, 1);
    }

    #[test]
    fn test_task_id_partial_eq() {
        assert_eq!(TaskId(1), TaskId(1));
        assert_ne!(TaskId(1), TaskId(2));
    }

    #[test]
    fn test_task_id_display() {
        let display = format!("{}", TaskId(5));
        assert!(display.contains('5'));
    }

    #[test]
    fn test_task_id_generator() {
        let generator = TaskIdGenerator::new();
        assert_eq!(generator.generate(), TaskId(0));
        assert_eq!(generator.generate(), TaskId(1));
    }
}

#[cfg(test)]
mod task_state_tests {
    use super::*;

    #[test]
    fn test_task_state_values() {
        assert_eq!(TaskState::Ready as u8, 0);
        assert_eq!(TaskState::Running as u8, 1);
        assert_eq!(TaskState::Finished as u8, 2);
        assert_eq!(TaskState::Failed as u8, 3);
    }

    #[test]
    fn test_task_state_partial_eq() {
        assert_eq!(TaskState::Ready, TaskState::Ready);
        assert_ne!(TaskState::Ready, TaskState::Running);
    }
}

#[cfg(test)]
mod task_priority_tests {
    use super::*;

    #[test]
    fn test_task_priority_values() {
        assert_eq!(TaskPriority::Low as u8, 0);
        assert_eq!(TaskPriority::Medium as u8, 1);
        assert_eq!(TaskPriority::High as u8, 2);
        assert_eq!(TaskPriority::default(), TaskPriority::Medium);
    }

    #[test]
    fn test_task_priority_ord() {
        assert!(TaskPriority::Low < TaskPriority::Medium);
        assert!(TaskPriority::Medium < TaskPriority::High);
        assert_eq!(
            TaskPriority::DESCENDING,
            [TaskPriority::High, TaskPriority::Medium, TaskPriority::Low]
        );
    }

    #[test]
    fn test_task_priority_display() {
        assert_eq!(TaskPriority::High.to_string(), "high");
        assert_eq!(TaskPriority::Low.as_str(), "low");
    }
}

#[cfg(test)]
mod task_tests {
    use super::*;

    #[test]
    fn test_task_new() {
        let pool = pool(1);
        let task = task(&pool, 1, TaskPriority::Medium);
        assert_eq!(task.id(), TaskId(1));
        assert_eq!(task.name(), "task-1");
        assert_eq!(task.priority(), TaskPriority::Medium);
        assert_eq!(task.state(), TaskState::Ready);
    }

    #[test]
    fn test_task_set_state() {
        let pool = pool(1);
        let task = task(&pool, 1, TaskPriority::Low);

        task.set_state(TaskState::Running);
        assert_eq!(task.state(), TaskState::Running);

        task.set_state(TaskState::Finished);
        assert_eq!(task.state(), TaskState::Finished);
    }

    #[test]
    fn test_task_executor_taken_once() {
        let pool = pool(1);
        let task = task(&pool, 1, TaskPriority::Low);
        assert!(task.take_executor().is_some());
        assert!(task.take_executor().is_none());
    }

    #[test]
    fn test_task_debug() {
        let pool = pool(1);
        let debug = format!("{:?}", task(&pool, 3, TaskPriority::High));
        assert!(debug.contains("Task"));
        assert!(debug.contains("task-3"));
    }
}

#[cfg(test)]
mod scheduler_config_tests {
    use super::*;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert!(config.num_workers >= 1);
        assert_eq!(config.stack_size, 2 * 1024 * 1024);
        assert!(config.use_work_stealing);
        assert_eq!(config.default_priority, TaskPriority::Medium);
    }

    #[test]
    fn test_scheduler_config_with_workers() {
        assert_eq!(SchedulerConfig::with_workers(3).num_workers, 3);
        assert_eq!(SchedulerConfig::with_workers(0).num_workers, 1);
    }
}

#[cfg(test)]
mod latch_tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_latch_counts() {
        let latch = CountLatch::new(2);
        assert!(!latch.probe());
        latch.decrement();
        assert_eq!(latch.count(), 1);
        latch.decrement();
        assert!(latch.probe());

        latch.increment();
        assert_eq!(latch.count(), 1);
    }

    #[test]
    fn test_latch_wait_released_by_other_thread() {
        let latch = Arc::new(CountLatch::new(1));
        let releaser = {
            let latch = latch.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                latch.decrement();
            })
        };
        latch.wait();
        assert!(latch.probe());
        releaser.join().unwrap();
    }

    #[test]
    fn test_latch_wait_timeout() {
        let latch = CountLatch::new(1);
        assert!(!latch.wait_timeout(Duration::from_millis(5)));
        latch.decrement();
        assert!(latch.wait_timeout(Duration::from_millis(5)));
    }
}
