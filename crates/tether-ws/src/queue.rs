//! Per-connection inbound job queue.
//!
//! The read loop is the producer and the drain task is the only consumer,
//! which is what keeps handler invocations for one connection sequential and
//! in arrival order. A bounded queue makes a slow handler push back on the
//! read loop instead of buffering without limit.

use tokio::sync::mpsc;

/// Queue sizing policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueCapacity {
    /// At most this many pending jobs; producers wait when full.
    Bounded(usize),
    /// No limit.
    Unbounded,
}

impl QueueCapacity {
    /// Map a settings value to a policy (`0` means unbounded).
    pub fn from_setting(capacity: usize) -> Self {
        if capacity == 0 {
            Self::Unbounded
        } else {
            Self::Bounded(capacity)
        }
    }
}

impl Default for QueueCapacity {
    fn default() -> Self {
        Self::Bounded(256)
    }
}

/// The consumer side is gone, so the job was not queued.
#[derive(Debug)]
pub struct QueueClosed<J>(pub J);

enum SenderInner<J> {
    Bounded(mpsc::Sender<J>),
    Unbounded(mpsc::UnboundedSender<J>),
}

/// Producer handle. Cloneable; every clone feeds the same consumer.
pub struct JobSender<J> {
    inner: SenderInner<J>,
}

enum ReceiverInner<J> {
    Bounded(mpsc::Receiver<J>),
    Unbounded(mpsc::UnboundedReceiver<J>),
}

/// Consumer handle. Not cloneable, so there is exactly one.
pub struct JobReceiver<J> {
    inner: ReceiverInner<J>,
}

/// Create a job queue with the given capacity policy.
pub fn inbound_queue<J>(capacity: QueueCapacity) -> (JobSender<J>, JobReceiver<J>) {
    match capacity {
        QueueCapacity::Bounded(n) => {
            let (tx, rx) = mpsc::channel(n.max(1));
            (
                JobSender {
                    inner: SenderInner::Bounded(tx),
                },
                JobReceiver {
                    inner: ReceiverInner::Bounded(rx),
                },
            )
        }
        QueueCapacity::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                JobSender {
                    inner: SenderInner::Unbounded(tx),
                },
                JobReceiver {
                    inner: ReceiverInner::Unbounded(rx),
                },
            )
        }
    }
}

impl<J> JobSender<J> {
    /// Enqueue a job, waiting for room on a full bounded queue.
    pub async fn push(&self, job: J) -> Result<(), QueueClosed<J>> {
        match &self.inner {
            SenderInner::Bounded(tx) => tx.send(job).await.map_err(|e| QueueClosed(e.0)),
            SenderInner::Unbounded(tx) => tx.send(job).map_err(|e| QueueClosed(e.0)),
        }
    }
}

impl<J> Clone for JobSender<J> {
    fn clone(&self) -> Self {
        let inner = match &self.inner {
            SenderInner::Bounded(tx) => SenderInner::Bounded(tx.clone()),
            SenderInner::Unbounded(tx) => SenderInner::Unbounded(tx.clone()),
        };
        Self { inner }
    }
}

impl<J> JobReceiver<J> {
    /// Next job in FIFO order; `None` once every sender is dropped and the
    /// queue is empty.
    pub async fn pop(&mut self) -> Option<J> {
        match &mut self.inner {
            ReceiverInner::Bounded(rx) => rx.recv().await,
            ReceiverInner::Unbounded(rx) => rx.recv().await,
        }
    }
}
