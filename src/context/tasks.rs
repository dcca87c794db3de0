//! Completions posted by an external scheduler.
//!
//! The scheduler may live on another thread; it only holds a [`TaskSender`].
//! Completions are drained on the script thread by
//! [`Context::run_pending`], each becoming an ordinary callback invocation.

use std::cell::RefCell;

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CallbackId, Context, HostState};
use crate::core::logging::TARGET_CONTEXT;
use crate::marshal::json::json_to_value;

/// One finished asynchronous operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub callback: CallbackId,
    pub payload: serde_json::Value,
}

/// Sending half of a context's completion queue.
#[derive(Debug, Clone)]
pub struct TaskSender {
    sender: Sender<Completion>,
}

impl TaskSender {
    /// Queues `payload` for `callback`. Returns `false` once the context is gone.
    pub fn complete(&self, callback: CallbackId, payload: serde_json::Value) -> bool {
        self.sender.send(Completion { callback, payload }).is_ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskReport {
    pub invoked: usize,
    /// Completions whose callback was released or belongs to an older generation.
    pub stale: usize,
    /// Display strings of exceptions thrown by callbacks.
    pub uncaught: Vec<String>,
}

pub(crate) struct TaskQueue {
    sender: Sender<Completion>,
    // `None` once closed; senders then see a disconnected channel
    receiver: RefCell<Option<Receiver<Completion>>>,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sender,
            receiver: RefCell::new(Some(receiver)),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.receiver.borrow().as_ref().map_or(0, Receiver::len)
    }

    fn next(&self) -> Option<Completion> {
        self.receiver.borrow().as_ref()?.try_recv().ok()
    }

    /// Discards everything queued and disconnects every sender.
    pub(crate) fn close(&self) -> usize {
        self.receiver
            .borrow_mut()
            .take()
            .map_or(0, |receiver| receiver.try_iter().count())
    }
}

impl<S: HostState> Context<S> {
    pub fn task_sender(&self) -> TaskSender {
        TaskSender {
            sender: self.inner.tasks.sender.clone(),
        }
    }

    /// Invokes the callbacks of every queued completion, in arrival order.
    pub fn run_pending(&self) -> TaskReport {
        let mut report = TaskReport::default();
        while let Some(completion) = self.inner.tasks.next() {
            let argument = match json_to_value(self, &completion.payload) {
                Ok(value) => value,
                Err(err) => {
                    report.uncaught.push(err.to_string());
                    continue;
                }
            };
            match self.invoke_callback(completion.callback, vec![argument]) {
                Ok(Some(_)) => report.invoked += 1,
                Ok(None) => report.stale += 1,
                Err(exception) => report
                    .uncaught
                    .push(self.realm().display_string(exception.value())),
            }
        }
        if report != TaskReport::default() {
            debug!(
                target: TARGET_CONTEXT,
                invoked = report.invoked,
                stale = report.stale,
                uncaught = report.uncaught.len(),
                "pending completions processed"
            );
        }
        report
    }
}
