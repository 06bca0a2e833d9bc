use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tracing::{debug, error, info_span, trace};

use crate::error::{Error, Result};
use crate::filter::{Filter, FilterChain};
use crate::request::Request;
use crate::response::Response;
use crate::task::{Task, TaskHandle, TaskId};
use crate::worker::spawn_on;

/// Outcome of offering a task to [`Admission`]
#[derive(Debug)]
pub enum Admit {
    /// Admitted; the task must be handed to a worker
    Run(Arc<Task>),
    /// Parked at the tail of the waiting queue
    Queued,
}

/// Running set and FIFO waiting queue, bounded by a concurrency cap
///
/// Pure bookkeeping; the caller serializes access and starts admitted
/// tasks. At most `capacity` tasks are running, and while anything waits the
/// running set is full.
#[derive(Debug)]
pub struct Admission {
    capacity: usize,
    running: Vec<Arc<Task>>,
    waiting: VecDeque<Arc<Task>>,
}

impl Admission {
    /// Create admission state allowing `capacity` concurrent tasks
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            running: Vec::new(),
            waiting: VecDeque::new(),
        }
    }

    /// Concurrency cap
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of running tasks
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Number of waiting tasks
    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    /// Admit `task` if there is room, otherwise queue it
    pub fn offer(&mut self, task: Arc<Task>) -> Admit {
        if self.running.len() < self.capacity {
            self.running.push(Arc::clone(&task));
            Admit::Run(task)
        } else {
            self.waiting.push_back(task);
            Admit::Queued
        }
    }

    /// Retire a running task and admit waiters in arrival order
    ///
    /// Canceled waiters are discarded instead of admitted. Finishing a task
    /// that is not running is an invariant violation.
    pub fn finish(&mut self, id: TaskId) -> Result<Vec<Arc<Task>>> {
        let index = self
            .running
            .iter()
            .position(|task| task.id() == id)
            .ok_or_else(|| Error::invariant(format!("task {} finished but was not running", id)))?;
        self.running.swap_remove(index);

        let mut admitted = Vec::new();
        while self.running.len() < self.capacity {
            let next = match self.waiting.pop_front() {
                Some(next) => next,
                None => break,
            };
            if next.is_canceled() {
                debug!(task = %next.id(), "dropping canceled task from queue");
                continue;
            }
            self.running.push(Arc::clone(&next));
            admitted.push(next);
        }
        Ok(admitted)
    }

    /// Empty the waiting queue, oldest first
    pub fn drain_waiting(&mut self) -> Vec<Arc<Task>> {
        self.waiting.drain(..).collect()
    }

    /// Remove a task from the waiting queue, returning whether it was there
    pub fn remove_waiting(&mut self, id: TaskId) -> bool {
        match self.waiting.iter().position(|task| task.id() == id) {
            Some(index) => {
                self.waiting.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Scheduler: admission control plus the hand-off to worker threads
pub(crate) struct Dispatcher {
    admission: Mutex<Admission>,
    handle: Handle,
    filters: Arc<[Arc<dyn Filter>]>,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub(crate) fn new(capacity: usize, handle: Handle, filters: Arc<[Arc<dyn Filter>]>) -> Arc<Self> {
        Arc::new(Self {
            admission: Mutex::new(Admission::new(capacity)),
            handle,
            filters,
            next_id: AtomicU64::new(1),
        })
    }

    fn admission(&self) -> MutexGuard<'_, Admission> {
        self.admission.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn running_count(&self) -> usize {
        self.admission().running_count()
    }

    pub(crate) fn waiting_count(&self) -> usize {
        self.admission().waiting_count()
    }

    pub(crate) fn new_task<F>(&self, request: Request, callback: F) -> TaskHandle
    where
        F: FnOnce(Response) + Send + 'static,
    {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        TaskHandle::new(Arc::new(Task::new(id, request, callback)))
    }

    /// Hand a task to admission control. Later calls for the same task do nothing.
    pub(crate) fn enqueue(self: &Arc<Self>, task: &Arc<Task>) {
        if !task.mark_enqueued() {
            debug!(task = %task.id(), "task already enqueued");
            return;
        }
        if task.is_canceled() {
            debug!(task = %task.id(), "task canceled before enqueue");
            task.abandon();
            return;
        }

        let admit = {
            let mut admission = self.admission();
            let admit = admission.offer(Arc::clone(task));
            trace!(
                task = %task.id(),
                running = admission.running_count(),
                waiting = admission.waiting_count(),
                "task enqueued"
            );
            admit
        };
        if let Admit::Run(task) = admit {
            self.start(task);
        }
    }

    /// Cancel a task and drop it from the queue if it has not started
    pub(crate) fn cancel(&self, task: &Task) {
        task.cancel();
        if self.admission().remove_waiting(task.id()) {
            debug!(task = %task.id(), "canceled task removed from queue");
            task.abandon();
        }
    }

    /// Drop every waiting task along with its callback. Returns how many were dropped.
    pub(crate) fn discard_waiting(&self) -> usize {
        let discarded = self.admission().drain_waiting();
        for task in &discarded {
            task.abandon();
        }
        discarded.len()
    }

    fn start(self: &Arc<Self>, task: Arc<Task>) {
        let dispatcher = Arc::clone(self);
        spawn_on(&self.handle, move || dispatcher.run(task));
    }

    fn run(self: &Arc<Self>, task: Arc<Task>) {
        let span = info_span!("task", id = %task.id(), name = task.name());
        let _enter = span.enter();

        if task.is_canceled() {
            debug!("task canceled before dispatch");
        } else {
            let mut chain = FilterChain::new(Arc::clone(&task), Arc::clone(&self.filters));
            let request = task.request().clone();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| chain.handle_request(request)));
            if let Err(payload) = outcome {
                error!(panic = panic_message(&*payload), "filter panicked, task abandoned");
            }
        }

        if task.abandon() && !task.is_canceled() {
            debug!("task ended without a response");
        }
        self.finish(&task);
    }

    fn finish(self: &Arc<Self>, task: &Task) {
        let admitted = self.admission().finish(task.id());
        match admitted {
            Ok(admitted) => {
                for next in admitted {
                    self.start(next);
                }
            }
            Err(e) => {
                error!(error = %e, "scheduler bookkeeping out of sync");
                debug_assert!(false, "{}", e);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: u64) -> Arc<Task> {
        let request = Request::builder()
            .url(&format!("http://example.com/{}", id))
            .unwrap()
            .build()
            .unwrap();
        Arc::new(Task::new(TaskId(id), request, |_| {}))
    }

    fn admitted_ids(tasks: &[Arc<Task>]) -> Vec<u64> {
        tasks.iter().map(|task| task.id().as_u64()).collect()
    }

    #[test]
    fn test_offer_respects_capacity() {
        let mut admission = Admission::new(2);
        assert!(matches!(admission.offer(task(1)), Admit::Run(_)));
        assert!(matches!(admission.offer(task(2)), Admit::Run(_)));
        assert!(matches!(admission.offer(task(3)), Admit::Queued));
        assert_eq!(admission.running_count(), 2);
        assert_eq!(admission.waiting_count(), 1);
    }

    fn running_ids(admission: &Admission) -> Vec<u64> {
        let mut ids: Vec<u64> = admission.running.iter().map(|task| task.id().as_u64()).collect();
        ids.sort_unstable();
        ids
    }

    fn waiting_ids(admission: &Admission) -> Vec<u64> {
        admission.waiting.iter().map(|task| task.id().as_u64()).collect()
    }

    #[test]
    fn test_finish_hands_slot_to_oldest_waiter() {
        let mut admission = Admission::new(2);
        for id in 1..=4 {
            admission.offer(task(id));
        }
        assert_eq!(running_ids(&admission), vec![1, 2]);
        assert_eq!(waiting_ids(&admission), vec![3, 4]);

        assert_eq!(admitted_ids(&admission.finish(TaskId(1)).unwrap()), vec![3]);
        assert_eq!(running_ids(&admission), vec![2, 3]);
        assert_eq!(waiting_ids(&admission), vec![4]);
    }

    #[test]
    fn test_drain_waiting_leaves_running_alone() {
        let mut admission = Admission::new(1);
        for id in 1..=3 {
            admission.offer(task(id));
        }
        assert_eq!(admitted_ids(&admission.drain_waiting()), vec![2, 3]);
        assert_eq!(admission.waiting_count(), 0);
        assert_eq!(running_ids(&admission), vec![1]);
        assert!(admission.finish(TaskId(1)).unwrap().is_empty());
    }

    #[test]
    fn test_waiters_admitted_in_arrival_order() {
        let mut admission = Admission::new(1);
        for id in 1..=4 {
            admission.offer(task(id));
        }

        assert_eq!(admitted_ids(&admission.finish(TaskId(1)).unwrap()), vec![2]);
        assert_eq!(admitted_ids(&admission.finish(TaskId(2)).unwrap()), vec![3]);
        assert_eq!(admitted_ids(&admission.finish(TaskId(3)).unwrap()), vec![4]);
        assert!(admission.finish(TaskId(4)).unwrap().is_empty());
        assert_eq!(admission.running_count(), 0);
    }

    #[test]
    fn test_canceled_waiters_are_skipped() {
        let mut admission = Admission::new(1);
        let waiting = task(2);
        admission.offer(task(1));
        admission.offer(Arc::clone(&waiting));
        admission.offer(task(3));

        waiting.cancel();
        assert_eq!(admitted_ids(&admission.finish(TaskId(1)).unwrap()), vec![3]);
        assert_eq!(admission.waiting_count(), 0);
    }

    #[test]
    fn test_remove_waiting() {
        let mut admission = Admission::new(1);
        admission.offer(task(1));
        admission.offer(task(2));
        assert!(admission.remove_waiting(TaskId(2)));
        assert!(!admission.remove_waiting(TaskId(2)));
        assert!(!admission.remove_waiting(TaskId(1)));
        assert_eq!(admission.waiting_count(), 0);
    }

    #[test]
    fn test_finishing_unknown_task_is_invariant_error() {
        let mut admission = Admission::new(1);
        admission.offer(task(1));
        let err = admission.finish(TaskId(9)).unwrap_err();
        assert!(err.is_invariant());
        assert_eq!(admission.running_count(), 1);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*payload), "unknown panic");
    }
}
