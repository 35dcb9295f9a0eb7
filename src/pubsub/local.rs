//! In-process pub/sub broker
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{PubSubClient, PubSubPayload, SubscribeCallback};
use crate::error::{QuorumError, Result};
use crate::transport_error;

/// Delivers published payloads synchronously to the callbacks subscribed
/// to their topic. Records unsubscribe requests so callers can inspect them.
pub struct LocalPubSubClient {
    name: String,
    subscriptions: Mutex<HashMap<String, SubscribeCallback>>,
    unsubscribe_requests: Mutex<Vec<Vec<String>>>,
    fail_unsubscribe: AtomicBool,
    stopped: AtomicBool,
}

impl std::fmt::Debug for LocalPubSubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPubSubClient")
            .field("name", &self.name)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Default for LocalPubSubClient {
    fn default() -> Self {
        Self::new("local")
    }
}

fn lock_err<T>(e: std::sync::PoisonError<T>) -> QuorumError {
    QuorumError::Concurrency(format!("Mutex lock fail {}", e))
}

impl LocalPubSubClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscriptions: Mutex::new(HashMap::new()),
            unsubscribe_requests: Mutex::new(Vec::new()),
            fail_unsubscribe: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Make subsequent `unsubscribe` calls fail
    pub fn set_fail_unsubscribe(&self, fail: bool) {
        self.fail_unsubscribe.store(fail, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .map(|subs| subs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every topic list passed to `unsubscribe`, in call order
    pub fn unsubscribe_requests(&self) -> Vec<Vec<String>> {
        self.unsubscribe_requests
            .lock()
            .map(|reqs| reqs.clone())
            .unwrap_or_default()
    }

    /// Deliver a transport error to the subscriber of `topic`
    pub fn emit_error(&self, topic: &str, error: impl Into<String>) -> Result<()> {
        let callback = self.callback_for(topic)?;
        if let Some(callback) = callback {
            callback(topic, Err(error.into()));
        }
        Ok(())
    }

    fn callback_for(&self, topic: &str) -> Result<Option<SubscribeCallback>> {
        let subs = self.subscriptions.lock().map_err(lock_err)?;
        Ok(subs.get(topic).cloned())
    }
}

#[async_trait]
impl PubSubClient for LocalPubSubClient {
    async fn subscribe(&self, topics: &[String], callback: SubscribeCallback) -> Result<()> {
        if self.is_stopped() {
            return Err(transport_error!("client {} is stopped", self.name));
        }
        let mut subs = self.subscriptions.lock().map_err(lock_err)?;
        for topic in topics {
            subs.insert(topic.clone(), callback.clone());
        }
        info!("[{}] Subscribed to {} topics", self.name, topics.len());
        Ok(())
    }

    async fn publish(&self, payloads: Vec<PubSubPayload>) -> Result<()> {
        if self.is_stopped() {
            return Err(transport_error!("client {} is stopped", self.name));
        }
        for payload in payloads {
            // Callbacks run without holding the lock
            match self.callback_for(&payload.topic)? {
                Some(callback) => callback(&payload.topic, Ok(payload.data)),
                None => debug!("[{}] No subscriber for {}", self.name, payload.topic),
            }
        }
        Ok(())
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<()> {
        self.unsubscribe_requests
            .lock()
            .map_err(lock_err)?
            .push(topics.to_vec());
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(transport_error!("unsubscribe rejected by {}", self.name));
        }
        let mut subs = self.subscriptions.lock().map_err(lock_err)?;
        for topic in topics {
            subs.remove(topic);
        }
        Ok(())
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.clear();
        }
        info!("[{}] Stopped", self.name);
    }

    fn unique_name(&self) -> String {
        format!("local::{}", self.name)
    }
}
