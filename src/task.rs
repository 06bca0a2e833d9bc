use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::request::Request;
use crate::response::Response;

/// Completion callback invoked with the final response
pub type Callback = Box<dyn FnOnce(Response) + Send + 'static>;

/// Identifier of a task, unique within one engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    /// Numeric value of the id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One unit of scheduled work: a request, its callback and a cancel flag
///
/// A task moves from created to waiting or running, then to finished. The
/// cancel flag may be raised at any time from any thread. The callback runs
/// at most once, and never after the task was canceled.
pub struct Task {
    id: TaskId,
    name: String,
    canceled: AtomicBool,
    enqueued: AtomicBool,
    request: Request,
    callback: Mutex<Option<Callback>>,
}

impl Task {
    pub(crate) fn new<F>(id: TaskId, request: Request, callback: F) -> Self
    where
        F: FnOnce(Response) + Send + 'static,
    {
        let name = format!("{} {}", request.method(), request.url());
        Self {
            id,
            name,
            canceled: AtomicBool::new(false),
            enqueued: AtomicBool::new(false),
            request,
            callback: Mutex::new(Some(Box::new(callback))),
        }
    }

    /// Task id
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Human readable name, `METHOD url`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The request this task will run
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Raise the cancel flag
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    /// Whether the cancel flag has been raised
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Whether the task has been handed to the scheduler
    pub fn is_enqueued(&self) -> bool {
        self.enqueued.load(Ordering::Acquire)
    }

    /// Returns true for exactly one caller
    pub(crate) fn mark_enqueued(&self) -> bool {
        !self.enqueued.swap(true, Ordering::AcqRel)
    }

    /// Deliver `response` to the callback unless canceled or already delivered
    pub(crate) fn complete(&self, response: Response) -> bool {
        if self.is_canceled() {
            return false;
        }
        match self.take_callback() {
            Some(callback) => {
                callback(response);
                true
            }
            None => false,
        }
    }

    /// Drop the callback without calling it. Returns whether one was still pending.
    ///
    /// Anything the callback captured is released, so a caller waiting on it
    /// sees the task end without a response.
    pub(crate) fn abandon(&self) -> bool {
        self.take_callback().is_some()
    }

    fn take_callback(&self) -> Option<Callback> {
        match self.callback.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("canceled", &self.is_canceled())
            .field("enqueued", &self.is_enqueued())
            .finish()
    }
}

/// Caller-side handle to a submitted task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    task: Arc<Task>,
}

impl TaskHandle {
    pub(crate) fn new(task: Arc<Task>) -> Self {
        Self { task }
    }

    pub(crate) fn task(&self) -> &Arc<Task> {
        &self.task
    }

    /// Task id
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Task name
    pub fn name(&self) -> &str {
        self.task.name()
    }

    /// Cancel the task; its callback will not fire
    pub fn cancel(&self) {
        self.task.cancel();
    }

    /// Whether the task was canceled
    pub fn is_canceled(&self) -> bool {
        self.task.is_canceled()
    }

    /// Whether the task has been enqueued
    pub fn is_enqueued(&self) -> bool {
        self.task.is_enqueued()
    }
}
