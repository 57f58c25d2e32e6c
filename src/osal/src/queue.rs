//! Message queues
use osal_core::{
    backend::{Backend, QueueOps},
    config::MAX_QUEUE_DEPTH,
    error::{CreateError, DeleteError, GetIdError, GetInfoError, QueueError},
    handle::Handle,
    name::ObjectName,
    time::Timeout,
};

use crate::{native, Osal};

/// *Queue control block*
pub(crate) struct QueueCb<B: QueueOps> {
    pub(crate) native: B::Queue,
    depth: usize,
    msg_size: usize,
}

/// The properties of a message queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: ObjectName,
    /// The maximum number of messages.
    pub depth: usize,
    /// The maximum size of a message.
    pub msg_size: usize,
    /// The number of messages currently queued.
    pub len: usize,
}

impl<B: Backend> Osal<B> {
    /// Create a queue holding up to `depth` messages of up to `msg_size`
    /// bytes each.
    pub fn queue_create(
        &self,
        name: &str,
        depth: usize,
        msg_size: usize,
    ) -> Result<Handle, CreateError> {
        if depth == 0 || depth > MAX_QUEUE_DEPTH || msg_size == 0 {
            return Err(CreateError::BadParam);
        }
        let reservation = self.reserve_named(&self.queues, name)?;
        let queue = native("queue_create", self.backend.queue_create(depth, msg_size))?;
        Ok(reservation
            .activate(QueueCb {
                native: queue,
                depth,
                msg_size,
            })
            .handle())
    }

    /// Delete a queue. Threads blocked on it return `InvalidHandle`; queued
    /// messages are discarded.
    pub fn queue_delete(&self, handle: Handle) -> Result<(), DeleteError> {
        let queue = self.queues.release(handle)?;
        native("queue_delete", self.backend.queue_delete(&queue.native))?;
        Ok(())
    }

    /// Append a message. If the queue is full, wait for room as specified by
    /// `timeout`; [`Timeout::NoWait`] fails at once with `Timeout`.
    pub fn queue_put(
        &self,
        handle: Handle,
        msg: &[u8],
        timeout: impl Into<Timeout>,
    ) -> Result<(), QueueError> {
        let queue = self.queues.get(handle)?;
        if msg.len() > queue.msg_size {
            return Err(QueueError::BadSize);
        }
        native(
            "queue_send",
            self.backend.queue_send(&queue.native, msg, timeout.into()),
        )?;
        Ok(())
    }

    /// Remove the oldest message and copy it into `buf`, returning its
    /// length. `buf` must be able to hold the largest possible message.
    pub fn queue_get(
        &self,
        handle: Handle,
        buf: &mut [u8],
        timeout: impl Into<Timeout>,
    ) -> Result<usize, QueueError> {
        let queue = self.queues.get(handle)?;
        if buf.len() < queue.msg_size {
            return Err(QueueError::BadSize);
        }
        let len = native(
            "queue_receive",
            self.backend.queue_receive(&queue.native, buf, timeout.into()),
        )?;
        Ok(len)
    }

    pub fn queue_get_id_by_name(&self, name: &str) -> Result<Handle, GetIdError> {
        ObjectName::new(name)?;
        self.queues.find_by_name(name).ok_or(GetIdError::NotFound)
    }

    pub fn queue_get_info(&self, handle: Handle) -> Result<QueueInfo, GetInfoError> {
        let queue = self.queues.get(handle)?;
        Ok(QueueInfo {
            name: queue.name().unwrap_or_default(),
            depth: queue.depth,
            msg_size: queue.msg_size,
            len: self.backend.queue_len(&queue.native),
        })
    }
}
