// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Event loop infrastructure for asynchronous message processing.
//!
//! Events post through an unbounded channel, so producers never block, and a
//! fixed pool of workers drains the channel concurrently. Events for
//! different partitions may therefore process in parallel; ordering is only
//! guaranteed up to the channel, not across workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::{error, info};
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::error::{QuernError, Result};

/// Trait defining actions to be performed in response to events in an event loop.
#[async_trait]
pub trait EventAction<E>: Send + Sync {
    /// Called when the event loop starts.
    fn on_start(&self);

    /// Called when the event loop stops.
    fn on_stop(&self);

    /// Called when an event is received.
    async fn on_receive(&self, event: E) -> Result<()>;

    /// Called when an error occurs during event processing.
    fn on_error(&self, error: QuernError);
}

/// An asynchronous event loop that processes events through a channel.
#[derive(Clone)]
pub struct EventLoop<E> {
    /// The name of this event loop for logging purposes.
    pub name: String,
    /// The number of worker tasks draining the event channel.
    pub worker_count: usize,
    stopped: Arc<AtomicBool>,
    action: Arc<dyn EventAction<E>>,
    tx_event: Option<mpsc::UnboundedSender<E>>,
}

impl<E: Send + 'static> EventLoop<E> {
    /// Creates a new event loop with the specified name, worker count, and action handler.
    pub fn new(name: String, worker_count: usize, action: Arc<dyn EventAction<E>>) -> Self {
        Self {
            name,
            worker_count: worker_count.max(1),
            stopped: Arc::new(AtomicBool::new(false)),
            action,
            tx_event: None,
        }
    }

    fn run(&self, rx_event: mpsc::UnboundedReceiver<E>) {
        let rx_event = Arc::new(Mutex::new(rx_event));
        for worker_id in 0..self.worker_count {
            let name = self.name.clone();
            let stopped = self.stopped.clone();
            let action = self.action.clone();
            let rx_event = rx_event.clone();
            tokio::spawn(async move {
                info!("Starting worker {worker_id} of the event loop {name}");
                while !stopped.load(Ordering::SeqCst) {
                    // Hold the receiver lock only while waiting for the next
                    // event so the other workers stay free to pick up work.
                    let event = rx_event.lock().await.recv().await;
                    if let Some(event) = event {
                        if let Err(e) = action.on_receive(event).await {
                            error!("Fail to process event due to {e}");
                            action.on_error(e);
                        }
                    } else {
                        info!("Event channel closed, shutting down");
                        break;
                    }
                }
                info!("Worker {worker_id} of the event loop {name} has been stopped");
            });
        }
    }

    /// Starts the event loop, spawning background tasks to process events.
    pub fn start(&mut self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(QuernError::General(format!(
                "{} has already been stopped",
                self.name
            )));
        }
        self.action.on_start();

        let (tx_event, rx_event) = mpsc::unbounded_channel::<E>();
        self.tx_event = Some(tx_event);
        self.run(rx_event);

        Ok(())
    }

    /// Stops the event loop.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.action.on_stop();
        } else {
            // Keep quiet to allow calling `stop` multiple times.
        }
    }

    /// Returns an event sender for posting events to this loop.
    pub fn get_sender(&self) -> Result<EventSender<E>> {
        Ok(EventSender {
            tx_event: self
                .tx_event
                .as_ref()
                .cloned()
                .ok_or_else(|| QuernError::General("Event sender not exist!!!".to_string()))?,
        })
    }
}

/// A sender handle for posting events to an event loop.
#[derive(Clone)]
pub struct EventSender<E> {
    tx_event: mpsc::UnboundedSender<E>,
}

impl<E> EventSender<E> {
    /// Creates a new event sender wrapping the given channel sender.
    pub fn new(tx_event: mpsc::UnboundedSender<E>) -> Self {
        Self { tx_event }
    }

    /// Posts an event to the event loop without blocking.
    pub fn post_event(&self, event: E) -> Result<()> {
        self.tx_event
            .send(event)
            .map_err(|e| QuernError::General(format!("Fail to send event due to {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Counter {
        seen: Arc<AtomicUsize>,
        errors: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventAction<u64> for Counter {
        fn on_start(&self) {}

        fn on_stop(&self) {}

        async fn on_receive(&self, event: u64) -> Result<()> {
            if event == 0 {
                return Err(QuernError::General("zero event".to_string()));
            }
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_error(&self, _error: QuernError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn processes_posted_events() -> Result<()> {
        let seen = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let mut event_loop = EventLoop::new(
            "test".to_string(),
            2,
            Arc::new(Counter {
                seen: seen.clone(),
                errors: errors.clone(),
            }),
        );
        event_loop.start()?;
        let sender = event_loop.get_sender()?;
        for event in 1..=10u64 {
            sender.post_event(event)?;
        }
        sender.post_event(0)?;

        for _ in 0..100 {
            if seen.load(Ordering::SeqCst) == 10 && errors.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen.load(Ordering::SeqCst), 10);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        event_loop.stop();
        Ok(())
    }

    #[tokio::test]
    async fn start_after_stop_is_rejected() {
        let event_loop = EventLoop::new(
            "test".to_string(),
            1,
            Arc::new(Counter {
                seen: Arc::new(AtomicUsize::new(0)),
                errors: Arc::new(AtomicUsize::new(0)),
            }),
        );
        event_loop.stop();
        let mut event_loop = event_loop;
        assert!(event_loop.start().is_err());
    }
}
