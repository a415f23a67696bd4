//! Dedicated worker thread that owns one session's state.
//!
//! # Invariants
//! - Tasks run one at a time in submission order.
//! - Dropping or closing the worker closes the queue; already queued tasks
//!   still run (and observe the invalidation flag) before the thread exits.

use super::state::SessionState;
use crate::error::{StackError, StackResult};
use log::{error, info};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

pub(crate) type Task = Box<dyn FnOnce(&mut SessionState) + Send + 'static>;

#[derive(Debug)]
pub(crate) struct Worker {
    label: String,
    sender: Mutex<Option<Sender<Task>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl Worker {
    pub fn spawn(label: String, state: SessionState) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let thread_label = label.clone();
        let handle = thread::Builder::new()
            .name(label.clone())
            .spawn(move || run(&thread_label, state, receiver))?;
        let thread_id = handle.thread().id();

        Ok(Self {
            label,
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    /// Whether the caller is running on this worker.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn submit(&self, task: Task) -> StackResult<()> {
        let sender = lock(&self.sender);
        match sender.as_ref() {
            Some(sender) => sender
                .send(task)
                .map_err(|_| StackError::Invalidated("session")),
            None => Err(StackError::Invalidated("session")),
        }
    }

    /// Closes the queue. The thread exits once queued tasks have run.
    pub fn close(&self) {
        drop(lock(&self.sender).take());
    }

    /// Waits for the thread to exit. Only meaningful after `close`.
    ///
    /// Called from the worker itself, the thread is left to exit on its own.
    pub fn join(&self) {
        if self.is_current() {
            return;
        }
        if let Some(handle) = lock(&self.handle).take() {
            if handle.join().is_err() {
                error!(
                    "event=session_worker module=session status=error worker={} error_code=worker_join_failed",
                    self.label
                );
            }
        }
    }
}

fn run(label: &str, mut state: SessionState, receiver: Receiver<Task>) {
    info!("event=session_worker module=session status=start worker={label}");
    while let Ok(task) = receiver.recv() {
        task(&mut state);
    }
    info!("event=session_worker module=session status=ok worker={label} phase=stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
