use tokio::sync::mpsc;

/// Events flowing from the consumer loop and the workers into the offset
/// committer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    /// A message was fetched and is now in flight.
    Registered { partition: i32, offset: i64 },
    /// The message reached a terminal outcome. `commit: false` means the
    /// offset must be held back (shutdown cancellation) so the broker
    /// redelivers on the next start.
    Completed {
        partition: i32,
        offset: i64,
        commit: bool,
    },
}

/// One-shot completion signal owned by a job ticket.
///
/// Exactly one `Completed` event reaches the committer per ticket: either
/// through an explicit `resolve` call, or through `Drop` (which reports
/// hold-back) if a worker dies before resolving.
#[derive(Debug)]
pub struct Completion {
    partition: i32,
    offset: i64,
    events: mpsc::UnboundedSender<TrackerEvent>,
    resolved: bool,
}

impl Completion {
    pub fn new(partition: i32, offset: i64, events: mpsc::UnboundedSender<TrackerEvent>) -> Self {
        Self {
            partition,
            offset,
            events,
            resolved: false,
        }
    }

    /// Mark the ticket terminal. `commit` controls whether the offset may
    /// advance past this message.
    pub fn resolve(mut self, commit: bool) {
        self.send(commit);
    }

    fn send(&mut self, commit: bool) {
        if self.resolved {
            return;
        }
        self.resolved = true;
        let _ = self.events.send(TrackerEvent::Completed {
            partition: self.partition,
            offset: self.offset,
            commit,
        });
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        // An unresolved drop means the worker never reached a terminal
        // outcome; hold the offset back so the message is redelivered.
        self.send(false);
    }
}

/// An in-flight unit of work: one Kafka message plus its completion signal.
///
/// Owned by the consumer loop until enqueued; ownership moves to a worker at
/// that point and the worker must drive it to exactly one terminal outcome.
#[derive(Debug)]
pub struct JobTicket {
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub received_at: tokio::time::Instant,
    pub completion: Completion,
}

impl JobTicket {
    /// The Kafka message key as UTF-8, or a synthetic `<partition>-<offset>`
    /// id when the message arrived unkeyed or with a non-UTF-8 key.
    pub fn message_key(&self) -> String {
        match &self.key {
            Some(bytes) => match std::str::from_utf8(bytes) {
                Ok(key) if !key.is_empty() => key.to_string(),
                _ => self.synthetic_key(),
            },
            None => self.synthetic_key(),
        }
    }

    pub fn has_synthetic_key(&self) -> bool {
        match &self.key {
            Some(bytes) => match std::str::from_utf8(bytes) {
                Ok(key) => key.is_empty(),
                Err(_) => true,
            },
            None => true,
        }
    }

    fn synthetic_key(&self) -> String {
        format!("{}-{}", self.partition, self.offset)
    }
}
