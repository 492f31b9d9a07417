use std::{
    collections::HashMap,
    future::Future,
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    courier_config::{ChannelConfig, UnregisteredPolicy},
    courier_protocol::{AgentName, Message},
    serde::Serialize,
    tokio::{
        sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError, mpsc},
        task::JoinHandle,
        time::timeout,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    handler::{HandlerStats, MessageHandler},
    pending::PendingReplies,
    registry::HandlerRegistry,
};

// ── Public types ────────────────────────────────────────────────────────────

/// Outcome of a successful `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted onto the ingress queue.
    Enqueued,
    /// Accepted by the caller's policy but never queued.
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    UnregisteredRecipient,
    CircuitOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Stop accepting, then deliver everything already queued.
    Drain,
    /// Stop accepting and throw queued messages away. Handlers already
    /// running are allowed to finish.
    Discard,
}

/// Point-in-time counters for a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
    pub replies_resolved: u64,
    pub discarded: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub mode: ShutdownMode,
    /// Requests still waiting for a reply when the channel closed.
    pub abandoned_requests: usize,
    pub stats: ChannelStats,
}

// ── Shared state ────────────────────────────────────────────────────────────

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    replies_resolved: AtomicU64,
    discarded: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            replies_resolved: self.replies_resolved.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    registry: HandlerRegistry,
    pending: PendingReplies,
    counters: Counters,
    config: ChannelConfig,
    /// One permit per undelivered message sent from outside a handler.
    capacity: Arc<Semaphore>,
    closed: AtomicBool,
    discarding: AtomicBool,
}

impl Shared {
    fn new(config: ChannelConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        Self {
            registry: HandlerRegistry::new(),
            pending: PendingReplies::new(),
            counters: Counters::default(),
            config,
            capacity: Arc::new(Semaphore::new(capacity)),
            closed: AtomicBool::new(false),
            discarding: AtomicBool::new(false),
        }
    }
}

/// A queued message and the queue slot it holds until its handler returns
/// or it is dropped.
struct Envelope {
    message: Message,
    slot: Option<OwnedSemaphorePermit>,
}

// ── ChannelHandle ───────────────────────────────────────────────────────────

/// Cloneable sending side of an [`A2aChannel`].
///
/// Handlers receive one with every message; anything else that needs to
/// talk on the channel gets one from [`A2aChannel::handle`].
///
/// At most `queue_capacity` messages sent through outside handles are
/// undelivered at any time; `send` waits for a slot once that many are
/// queued or running. Handles given to handlers skip the limit, since the
/// slots they would wait for are held by the very deliveries they are part
/// of.
#[derive(Clone)]
pub struct ChannelHandle {
    shared: Arc<Shared>,
    ingress: mpsc::UnboundedSender<Envelope>,
    in_handler: bool,
}

impl ChannelHandle {
    /// Register `handler` as the receiver for `name`. A second registration
    /// under the same name replaces the first.
    pub fn register_handler(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        let name = AgentName::new(name)?;
        self.shared.registry.register(name, handler);
        Ok(())
    }

    pub fn unregister_handler(&self, name: &str) -> bool {
        self.shared.registry.unregister(name)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.shared.registry.contains(name)
    }

    pub fn registered_agents(&self) -> Vec<String> {
        self.shared.registry.names()
    }

    /// Queue `message` for its recipient, waiting for queue space if needed.
    pub async fn send(&self, message: Message) -> Result<Delivery> {
        if let Some(dropped) = self.admit(&message)? {
            return Ok(dropped);
        }
        let slot = if self.in_handler {
            None
        } else {
            let capacity = Arc::clone(&self.shared.capacity);
            Some(capacity.acquire_owned().await.map_err(|_| Error::Closed)?)
        };
        self.enqueue(Envelope { message, slot })
    }

    /// Like [`send`](Self::send) but fails with [`Error::QueueFull`] instead
    /// of waiting.
    pub fn try_send(&self, message: Message) -> Result<Delivery> {
        if let Some(dropped) = self.admit(&message)? {
            return Ok(dropped);
        }
        let slot = if self.in_handler {
            None
        } else {
            match Arc::clone(&self.shared.capacity).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(TryAcquireError::NoPermits) => return Err(Error::QueueFull),
                Err(TryAcquireError::Closed) => return Err(Error::Closed),
            }
        };
        self.enqueue(Envelope { message, slot })
    }

    /// Send `message` and wait for the `reply_kind` reply carrying its
    /// correlation id, using the configured request timeout.
    pub async fn request(&self, message: Message, reply_kind: &str) -> Result<Message> {
        let wait = self.shared.config.request_timeout();
        self.request_with_timeout(message, reply_kind, wait).await
    }

    /// Send `message` and wait up to `wait` for a `reply_kind` message
    /// addressed back to its sender with the same correlation id. Other
    /// messages sharing the id are dispatched to the sender's handler as
    /// usual.
    pub async fn request_with_timeout(
        &self,
        message: Message,
        reply_kind: &str,
        wait: Duration,
    ) -> Result<Message> {
        let id = message.correlation_id().clone();
        let recipient = message.recipient().clone();
        let rx = self
            .shared
            .pending
            .register(id.clone(), message.sender().clone(), reply_kind)?;

        match self.send(message).await {
            Ok(Delivery::Enqueued) => {},
            Ok(Delivery::Dropped(_)) => {
                self.shared.pending.cancel(&id);
                return Err(Error::unregistered(recipient));
            },
            Err(e) => {
                self.shared.pending.cancel(&id);
                return Err(e);
            },
        }

        match timeout(wait, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                self.shared.pending.cancel(&id);
                Err(Error::RequestTimeout {
                    correlation_id: id.to_string(),
                    timeout: wait,
                })
            },
        }
    }

    pub fn stats(&self) -> ChannelStats {
        self.shared.counters.snapshot()
    }

    pub fn handler_stats(&self, name: &str) -> Option<Arc<HandlerStats>> {
        self.shared.registry.stats(name)
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// The handle passed to handlers; its sends do not wait for queue slots.
    fn for_handler(&self) -> Self {
        Self {
            in_handler: true,
            ..self.clone()
        }
    }

    fn enqueue(&self, envelope: Envelope) -> Result<Delivery> {
        Counters::bump(&self.shared.counters.enqueued);
        if self.ingress.send(envelope).is_err() {
            self.shared.counters.enqueued.fetch_sub(1, Ordering::Relaxed);
            return Err(Error::Closed);
        }
        Ok(Delivery::Enqueued)
    }

    /// Decide whether `message` may enter the queue. `Some` means the
    /// unregistered policy dropped it.
    fn admit(&self, message: &Message) -> Result<Option<Delivery>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let recipient = message.recipient();
        if self.shared.registry.contains(recipient.as_str()) || self.shared.pending.awaits(message)
        {
            return Ok(None);
        }
        match self.shared.config.unregistered {
            UnregisteredPolicy::Reject => Err(Error::unregistered(recipient)),
            UnregisteredPolicy::Drop => {
                Counters::bump(&self.shared.counters.dropped);
                warn!(
                    agent = %recipient,
                    kind = message.kind(),
                    "no handler registered, dropping message"
                );
                Ok(Some(Delivery::Dropped(DropReason::UnregisteredRecipient)))
            },
        }
    }
}

// ── A2aChannel ──────────────────────────────────────────────────────────────

/// Owns the dispatch loop. Dropping it without [`shutdown`](Self::shutdown)
/// stops dispatch in discard mode.
pub struct A2aChannel {
    handle: ChannelHandle,
    cancel: CancellationToken,
    dispatcher: Option<JoinHandle<ShutdownReport>>,
}

impl A2aChannel {
    /// Spawn the dispatch loop on the current tokio runtime.
    pub fn start(config: ChannelConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (ingress, rx) = mpsc::unbounded_channel();
        let handle = ChannelHandle {
            shared: Arc::new(Shared::new(config)),
            ingress,
            in_handler: false,
        };
        let cancel = CancellationToken::new();
        let dispatcher = tokio::spawn(run_dispatcher(handle.clone(), rx, cancel.clone()));
        info!(capacity, "a2a channel started");
        Self {
            handle,
            cancel,
            dispatcher: Some(dispatcher),
        }
    }

    pub fn handle(&self) -> ChannelHandle {
        self.handle.clone()
    }

    /// Close the channel. New sends fail with [`Error::Closed`] as soon as
    /// this is called; the returned future resolves once dispatch has stopped
    /// and every handler has returned.
    pub fn shutdown(mut self, mode: ShutdownMode) -> impl Future<Output = ShutdownReport> {
        let shared = Arc::clone(&self.handle.shared);
        close(&shared, &self.cancel, mode);
        let dispatcher = self.dispatcher.take();
        async move {
            let report = match dispatcher {
                Some(task) => match task.await {
                    Ok(report) => report,
                    Err(e) => {
                        warn!(error = %e, "dispatch loop ended abnormally");
                        ShutdownReport {
                            mode,
                            abandoned_requests: shared.pending.fail_all(),
                            stats: shared.counters.snapshot(),
                        }
                    },
                },
                None => ShutdownReport {
                    mode,
                    abandoned_requests: 0,
                    stats: shared.counters.snapshot(),
                },
            };
            info!(
                ?mode,
                delivered = report.stats.delivered,
                failed = report.stats.failed,
                discarded = report.stats.discarded,
                abandoned_requests = report.abandoned_requests,
                "a2a channel stopped"
            );
            report
        }
    }
}

impl Deref for A2aChannel {
    type Target = ChannelHandle;

    fn deref(&self) -> &ChannelHandle {
        &self.handle
    }
}

impl Drop for A2aChannel {
    fn drop(&mut self) {
        if self.dispatcher.is_some() {
            close(&self.handle.shared, &self.cancel, ShutdownMode::Discard);
        }
    }
}

fn close(shared: &Shared, cancel: &CancellationToken, mode: ShutdownMode) {
    if mode == ShutdownMode::Discard {
        shared.discarding.store(true, Ordering::Release);
    }
    shared.closed.store(true, Ordering::Release);
    // Senders still waiting for a slot give up with `Closed`.
    shared.capacity.close();
    cancel.cancel();
}

// ── Dispatch loop ───────────────────────────────────────────────────────────

struct Worker {
    tx: mpsc::UnboundedSender<Envelope>,
    task: JoinHandle<()>,
}

async fn run_dispatcher(
    handle: ChannelHandle,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    cancel: CancellationToken,
) -> ShutdownReport {
    let mut workers: HashMap<AgentName, Worker> = HashMap::new();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(envelope) => route(&handle, &mut workers, envelope),
                None => break,
            },
        }
    }

    rx.close();
    let shared = &handle.shared;
    let discarding = shared.discarding.load(Ordering::Acquire);
    while let Some(envelope) = rx.recv().await {
        if discarding {
            Counters::bump(&shared.counters.discarded);
        } else {
            route(&handle, &mut workers, envelope);
        }
    }

    // Closing the worker queues lets each worker finish what it holds.
    let tasks: Vec<JoinHandle<()>> = workers.into_values().map(|w| w.task).collect();
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "recipient worker ended abnormally");
        }
    }

    let abandoned_requests = shared.pending.fail_all();
    ShutdownReport {
        mode: if discarding {
            ShutdownMode::Discard
        } else {
            ShutdownMode::Drain
        },
        abandoned_requests,
        stats: shared.counters.snapshot(),
    }
}

/// Hand one message to its destination: a waiting request, or the FIFO
/// queue of the recipient's worker.
fn route(handle: &ChannelHandle, workers: &mut HashMap<AgentName, Worker>, envelope: Envelope) {
    let shared = &handle.shared;
    let Envelope { message, slot } = envelope;
    let correlation_id = message.correlation_id().clone();
    let Some(message) = shared.pending.resolve(message) else {
        Counters::bump(&shared.counters.replies_resolved);
        debug!(%correlation_id, "reply matched pending request");
        return;
    };

    let recipient = message.recipient().clone();
    if !shared.registry.contains(recipient.as_str()) {
        Counters::bump(&shared.counters.dropped);
        warn!(
            agent = %recipient,
            kind = message.kind(),
            "recipient unregistered before dispatch, dropping message"
        );
        return;
    }

    let envelope = Envelope { message, slot };
    let envelope = match workers.get(&recipient) {
        Some(worker) => match worker.tx.send(envelope) {
            Ok(()) => return,
            Err(mpsc::error::SendError(envelope)) => envelope,
        },
        None => envelope,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_worker(handle.clone(), recipient.clone(), rx));
    if tx.send(envelope).is_err() {
        Counters::bump(&shared.counters.dropped);
        warn!(agent = %recipient, "recipient worker unavailable, dropping message");
    }
    workers.insert(recipient, Worker { tx, task });
}

async fn run_worker(
    handle: ChannelHandle,
    agent: AgentName,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
) {
    while let Some(Envelope { message, slot }) = rx.recv().await {
        if handle.shared.discarding.load(Ordering::Acquire) {
            Counters::bump(&handle.shared.counters.discarded);
            continue;
        }
        deliver(&handle, &agent, message).await;
        drop(slot);
    }
    debug!(agent = %agent, "recipient worker stopped");
}

/// Invoke the recipient's handler once, isolated in its own task so an
/// error, panic, or overrun is contained and recorded.
async fn deliver(handle: &ChannelHandle, agent: &AgentName, message: Message) {
    let shared = &handle.shared;
    let Some(entry) = shared.registry.entry(agent.as_str()) else {
        Counters::bump(&shared.counters.dropped);
        warn!(agent = %agent, kind = message.kind(), "handler removed before delivery, dropping message");
        return;
    };

    let config = &shared.config;
    if entry.stats.circuit_open(
        agent.as_str(),
        config.circuit_breaker_threshold,
        config.circuit_breaker_cooldown(),
    ) {
        Counters::bump(&shared.counters.dropped);
        warn!(
            agent = %agent,
            kind = message.kind(),
            reason = ?DropReason::CircuitOpen,
            "dropping message"
        );
        return;
    }

    let kind = message.kind().to_string();
    let correlation_id = message.correlation_id().clone();
    let handler = Arc::clone(&entry.handler);
    let channel = handle.for_handler();
    let handler_timeout = config.handler_timeout();
    let start = Instant::now();

    let mut task = tokio::spawn(async move { handler.handle(message, &channel).await });
    let outcome = match timeout(handler_timeout, &mut task).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(format!("{e:#}")),
        Ok(Err(e)) if e.is_panic() => Err("handler panicked".to_string()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => {
            task.abort();
            Err(format!("timed out after {handler_timeout:?}"))
        },
    };
    let latency = start.elapsed();

    match outcome {
        Ok(()) => {
            entry.stats.record_success(latency);
            Counters::bump(&shared.counters.delivered);
            debug!(
                agent = %agent,
                kind = %kind,
                %correlation_id,
                latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                "message handled"
            );
        },
        Err(reason) => {
            entry.stats.record_failure(latency, &reason);
            Counters::bump(&shared.counters.failed);
            let error = Error::handler_failure(agent, &reason);
            warn!(
                agent = %agent,
                kind = %kind,
                %correlation_id,
                %error,
                "message handler failed"
            );
        },
    }
}
