use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{DeliveryError, OutboundMessage, SendResult, Transport};

const QUEUE_SIZE: usize = 1000;

/// Minimum spacing between two messages to the same chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub private_chat: Duration,
    /// Groups and channels, i.e. negative chat ids
    pub group_chat: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            private_chat: Duration::from_secs(1),
            group_chat: Duration::from_secs(3),
        }
    }
}

impl RateLimits {
    pub fn interval(&self, chat_id: i64) -> Duration {
        if chat_id < 0 {
            self.group_chat
        } else {
            self.private_chat
        }
    }
}

struct Request {
    message: OutboundMessage,
    reply: oneshot::Sender<Result<SendResult, DeliveryError>>,
}

/// Serializes outbound messages so no chat is written to faster than its
/// [`RateLimits`] allow.
///
/// A single consumer task owns the queue and the last-sent timestamps;
/// requests are handled strictly in arrival order.
pub struct RateLimiter {
    transport: Arc<dyn Transport>,
    queue: mpsc::Sender<Request>,
    cancel: CancellationToken,
    done: CancellationToken,
}

impl RateLimiter {
    /// Start the consumer on the current tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, limits: RateLimits) -> Self {
        let (queue, receiver) = mpsc::channel(QUEUE_SIZE);
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();

        tokio::spawn(process_queue(
            receiver,
            transport.clone(),
            limits,
            cancel.clone(),
            done.clone(),
        ));

        Self {
            transport,
            queue,
            cancel,
            done,
        }
    }

    /// Queue `message` and wait until it is sent.
    pub async fn send(&self, message: OutboundMessage) -> Result<SendResult, DeliveryError> {
        if self.cancel.is_cancelled() {
            return Err(DeliveryError::Cancelled);
        }

        let (reply, response) = oneshot::channel();
        tokio::select! {
            queued = self.queue.send(Request { message, reply }) => {
                if queued.is_err() {
                    return Err(DeliveryError::Cancelled);
                }
            }
            _ = self.cancel.cancelled() => return Err(DeliveryError::Cancelled),
        }

        response.await.unwrap_or(Err(DeliveryError::Cancelled))
    }

    /// Execute `message` immediately, bypassing the queue.
    pub async fn request(&self, message: OutboundMessage) -> Result<(), DeliveryError> {
        if self.cancel.is_cancelled() {
            return Err(DeliveryError::Cancelled);
        }
        Ok(self.transport.request(&message).await?)
    }

    /// Begin shutdown. Queued and future sends fail with
    /// [`DeliveryError::Cancelled`].
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the consumer has drained the queue and exited.
    pub async fn stopped(&self) {
        self.done.cancelled().await;
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn process_queue(
    mut queue: mpsc::Receiver<Request>,
    transport: Arc<dyn Transport>,
    limits: RateLimits,
    cancel: CancellationToken,
    done: CancellationToken,
) {
    let mut last_sent: HashMap<i64, Instant> = HashMap::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = queue.recv() => {
                let Some(request) = next else { break };
                let queue_len = queue.len();
                handle_request(request, transport.as_ref(), &limits, &mut last_sent, &cancel, queue_len)
                    .await;
            }
        }
    }

    queue.close();
    let mut cancelled = 0usize;
    while let Ok(request) = queue.try_recv() {
        let _ = request.reply.send(Err(DeliveryError::Cancelled));
        cancelled += 1;
    }

    tracing::debug!(cancelled = cancelled, "Rate limiter stopped");
    done.cancel();
}

async fn handle_request(
    request: Request,
    transport: &dyn Transport,
    limits: &RateLimits,
    last_sent: &mut HashMap<i64, Instant>,
    cancel: &CancellationToken,
    queue_len: usize,
) {
    let chat_id = request.message.chat_id();

    if let Some(last) = last_sent.get(&chat_id) {
        let delay = limits.interval(chat_id).saturating_sub(last.elapsed());

        if !delay.is_zero() {
            tracing::debug!(
                chat_id = chat_id,
                delay_ms = delay.as_millis() as u64,
                method = request.message.method(),
                queue_len = queue_len,
                "Rate limiting message"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    let _ = request.reply.send(Err(DeliveryError::Cancelled));
                    return;
                }
            }
        }
    }

    let result = transport.send(&request.message).await;
    // Failed attempts count too
    last_sent.insert(chat_id, Instant::now());

    if let Err(e) = &result {
        tracing::warn!(chat_id = chat_id, method = request.message.method(), error = %e, "Send failed");
    }

    let _ = request.reply.send(result.map_err(DeliveryError::from));
}
