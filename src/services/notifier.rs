//! Outbound credit notifications.
//!
//! Deliveries run on a background worker over a bounded in-process queue so a
//! slow notification channel can never block a ledger commit. The queue drops
//! the oldest message on overflow; failed deliveries are retried a bounded
//! number of times and then dropped with a log.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, warn};

const MAX_DELIVERY_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditNotification {
    pub member_code: String,
    pub amount: BigDecimal,
    pub account: String,
    pub timestamp: DateTime<Utc>,
}

struct Inner {
    queue: Mutex<VecDeque<CreditNotification>>,
    wakeup: Notify,
    capacity: usize,
}

#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Inner>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                wakeup: Notify::new(),
                capacity,
            }),
        }
    }

    /// Queue a notification. Never blocks; on overflow the oldest queued
    /// message is dropped.
    pub fn enqueue(&self, notification: CreditNotification) {
        {
            let mut queue = self.inner.queue.lock().unwrap();
            if queue.len() >= self.inner.capacity {
                let dropped = queue.pop_front();
                warn!(
                    "notification queue full, dropping oldest for member {:?}",
                    dropped.map(|d| d.member_code)
                );
            }
            queue.push_back(notification);
        }
        self.inner.wakeup.notify_one();
    }

    pub fn queued(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    fn pop(&self) -> Option<CreditNotification> {
        self.inner.queue.lock().unwrap().pop_front()
    }

    /// Spawn the delivery worker posting to `url`. Call once at startup when a
    /// notification channel is configured.
    pub fn spawn_worker(&self, url: String) -> tokio::task::JoinHandle<()> {
        let notifier = self.clone();
        let client = reqwest::Client::new();

        tokio::spawn(async move {
            loop {
                while let Some(notification) = notifier.pop() {
                    deliver(&client, &url, &notification).await;
                }
                notifier.inner.wakeup.notified().await;
            }
        })
    }
}

async fn deliver(client: &reqwest::Client, url: &str, notification: &CreditNotification) {
    for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
        match client.post(url).json(notification).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(
                    "notification delivered for member {} (attempt {})",
                    notification.member_code, attempt
                );
                return;
            }
            Ok(resp) => {
                warn!(
                    "notification channel returned {} for member {} (attempt {})",
                    resp.status(),
                    notification.member_code,
                    attempt
                );
            }
            Err(e) => {
                warn!(
                    "notification delivery failed for member {} (attempt {}): {}",
                    notification.member_code, attempt, e
                );
            }
        }
        if attempt < MAX_DELIVERY_ATTEMPTS {
            sleep(RETRY_DELAY).await;
        }
    }
    warn!(
        "dropping notification for member {} after {} attempts",
        notification.member_code, MAX_DELIVERY_ATTEMPTS
    );
}
