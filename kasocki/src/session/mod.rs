/* Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

//! The per-socket consumer session.
//!
//! One session per accepted connection, one task per session. Inbound
//! socket events and the consume pipeline are multiplexed on that single
//! task, so session state needs no locks: every mutation happens between
//! `select!` iterations, and cancelling an in-flight consume is simply
//! dropping its future.

mod events;

pub use events::{EventKind, ServerEvent, SocketEmitter, SocketEvent};

use serde_json::{Map, Value, json};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::assignments::{self, Assignment};
use crate::broker::{BrokerAdapter, BrokerClient, BrokerEventHook, BrokerMetadata};
use crate::configs::SessionConfig;
use crate::deserializer::{Deserializer, JsonDeserializer};
use crate::error::KasockiError;
use crate::filtering::{DottedPathMatcherFactory, Matcher, MatcherFactory};
use crate::metrics::{MetricsSink, NoopMetrics};

/// The pluggable seams of a session. Defaults: JSON deserializer with
/// origin metadata, the dotted-path filter dialect, no-op metrics, no
/// broker event hook.
pub struct SessionOptions {
    pub deserializer: Arc<dyn Deserializer>,
    pub matcher_factory: Arc<dyn MatcherFactory>,
    pub metrics: Arc<dyn MetricsSink>,
    pub broker_event_hook: Option<BrokerEventHook>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            deserializer: Arc::new(JsonDeserializer),
            matcher_factory: Arc::new(DottedPathMatcherFactory),
            metrics: Arc::new(NoopMetrics),
            broker_event_hook: None,
        }
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("deserializer", &self.deserializer)
            .field("matcher_factory", &self.matcher_factory)
            .field("metrics", &self.metrics)
            .field(
                "broker_event_hook",
                &self.broker_event_hook.as_ref().map(|_| "..."),
            )
            .finish()
    }
}

/// Per-socket session state and event loop.
pub struct Session<E: SocketEmitter> {
    id: String,
    config: SessionConfig,
    emitter: E,
    broker: BrokerAdapter,
    metadata: BrokerMetadata,
    available_topics: Vec<String>,
    assignments: Vec<Assignment>,
    matcher: Option<Box<dyn Matcher>>,
    deserializer: Arc<dyn Deserializer>,
    matcher_factory: Arc<dyn MatcherFactory>,
    metrics: Arc<dyn MetricsSink>,
    subscribed: bool,
    running: bool,
    closing: bool,
    /// Ack ids of pull requests awaiting their message, in arrival order.
    /// `None` entries are consume requests that did not ask for an ack.
    pending_consumes: VecDeque<Option<String>>,
}

impl<E: SocketEmitter> Session<E> {
    /// Connects the broker, fixes the available-topic set and emits
    /// `ready`. Fails (with the broker released and no `ready` emitted)
    /// when the broker is unreachable or the topic set comes up empty.
    pub async fn initialize(
        socket_id: String,
        config: SessionConfig,
        client: Box<dyn BrokerClient>,
        emitter: E,
        options: SessionOptions,
    ) -> Result<Self, KasockiError> {
        let mut broker = BrokerAdapter::new(
            client,
            &config.broker,
            &socket_id,
            config.disconnect_timeout(),
        );
        if let Some(hook) = options.broker_event_hook {
            broker = broker.with_event_hook(hook);
        }

        if let Err(error) = broker.connect().await {
            error!("session: {socket_id} broker connect failed: {error}");
            broker.disconnect().await;
            return Err(error.into());
        }
        let metadata = match broker.metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                error!("session: {socket_id} metadata lookup failed: {error}");
                broker.disconnect().await;
                return Err(error.into());
            }
        };

        let mut available_topics = metadata.topic_names();
        if let Some(allowed) = &config.allowed_topics {
            available_topics.retain(|topic| allowed.contains(topic));
        }
        available_topics.sort();
        if available_topics.is_empty() {
            error!("session: {socket_id} has no available topics");
            broker.disconnect().await;
            return Err(KasockiError::Kasocki(
                "no topics are available to this session".to_owned(),
            ));
        }

        let mut session = Self {
            id: socket_id,
            config,
            emitter,
            broker,
            metadata,
            available_topics,
            assignments: Vec::new(),
            matcher: None,
            deserializer: options.deserializer,
            matcher_factory: options.matcher_factory,
            metrics: options.metrics,
            subscribed: false,
            running: false,
            closing: false,
            pending_consumes: VecDeque::new(),
        };
        info!(
            "session: {} ready, available topics: {:?}",
            session.id, session.available_topics
        );
        session
            .emit(ServerEvent::Ready {
                data: session.available_topics.clone(),
            })
            .await;
        if session.closing {
            return Err(KasockiError::Kasocki(
                "socket went away before ready".to_owned(),
            ));
        }
        Ok(session)
    }

    pub fn socket_id(&self) -> &str {
        &self.id
    }

    pub fn available_topics(&self) -> &[String] {
        &self.available_topics
    }

    /// The session event loop. Inbound events win over the consume
    /// pipeline (`biased`), so `stop` and `disconnect` are observed before
    /// the next poll; a consume in flight at that moment is dropped
    /// without delivery.
    pub async fn run(mut self, mut events: mpsc::Receiver<SocketEvent>) {
        loop {
            if self.closing {
                break;
            }
            let consume_active = self.consume_active();
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    // Socket gone without an explicit disconnect event.
                    None => self.close().await,
                },
                step = self.consume_step(), if consume_active => {
                    self.deliver(step).await;
                }
            }
        }
        debug!("session: {} event loop ended", self.id);
    }

    /// The wrap around every handler: entry log, per-event counter, then
    /// result-to-ack adaptation with failures also emitted as `err`.
    async fn handle_event(&mut self, event: SocketEvent) {
        let name: &'static str = event.kind.into();
        debug!(
            "session: {}, event: {name}, argument: {}",
            self.id, event.payload
        );
        self.metrics.increment(name);
        if self.closing {
            warn!("session: {} is closing, dropping {name} event", self.id);
            return;
        }

        let outcome = match event.kind {
            EventKind::Subscribe => Some(self.on_subscribe(&event.payload).await),
            EventKind::Filter => Some(self.on_filter(&event.payload)),
            EventKind::Consume => self.on_consume(event.ack.clone()),
            EventKind::Start => Some(self.on_start()),
            EventKind::Stop => Some(self.on_stop()),
            EventKind::Disconnect => {
                self.close().await;
                None
            }
        };
        match outcome {
            Some(Ok(data)) => {
                if let Some(id) = event.ack {
                    self.emit(ServerEvent::Ack { id, data }).await;
                }
            }
            Some(Err(error)) => self.fail(event.ack, &error, name).await,
            None => {}
        }
    }

    /// Validates and applies the one subscription this session gets. The
    /// ack carries the normalized assignment list so name-form subscribers
    /// learn their starting positions.
    async fn on_subscribe(&mut self, argument: &Value) -> Result<Value, KasockiError> {
        if self.subscribed {
            return Err(KasockiError::AlreadySubscribed {
                assignments: self.assignments.clone(),
            });
        }
        let request = assignments::parse_subscribe_request(argument)?;
        let normalized =
            assignments::normalize(request, &self.metadata, &self.available_topics)?;
        self.broker.assign(&normalized).await?;
        self.subscribed = true;
        self.assignments = normalized;
        info!(
            "session: {} subscribed to {} partition(s)",
            self.id,
            self.assignments.len()
        );
        Ok(json!(self.assignments))
    }

    /// Installs, replaces or (on an empty/absent spec) resets the filter.
    fn on_filter(&mut self, argument: &Value) -> Result<Value, KasockiError> {
        let reset =
            argument.is_null() || argument.as_object().is_some_and(Map::is_empty);
        if reset {
            if self.matcher.take().is_some() {
                debug!("session: {} filters reset", self.id);
            }
            return Ok(Value::Null);
        }
        let matcher = self.matcher_factory.compile(argument)?;
        let view = matcher.compiled_view();
        debug!("session: {} filters installed: {view}", self.id);
        self.matcher = Some(matcher);
        Ok(view)
    }

    /// Pull mode: the ack is parked until the pipeline produces the next
    /// matched message, so the client paces delivery.
    fn on_consume(&mut self, ack: Option<String>) -> Option<Result<Value, KasockiError>> {
        if !self.subscribed {
            return Some(Err(KasockiError::NotSubscribed));
        }
        self.pending_consumes.push_back(ack);
        None
    }

    fn on_start(&mut self) -> Result<Value, KasockiError> {
        if !self.subscribed {
            return Err(KasockiError::NotSubscribed);
        }
        if self.running {
            return Err(KasockiError::AlreadyStarted);
        }
        self.running = true;
        info!("session: {} push delivery started", self.id);
        Ok(json!("ok"))
    }

    fn on_stop(&mut self) -> Result<Value, KasockiError> {
        if self.running {
            self.running = false;
            info!("session: {} push delivery stopped", self.id);
        } else {
            debug!("session: {} stop with push delivery not running", self.id);
        }
        Ok(json!("ok"))
    }

    fn consume_active(&self) -> bool {
        !self.closing && (self.running || !self.pending_consumes.is_empty())
    }

    /// One full consume: poll, deserialize, filter. Transient broker
    /// conditions back off and retry; undeserializable and filtered-out
    /// records advance the position and retry; hard broker errors
    /// propagate. Cancellation happens by dropping this future from
    /// `run`, which also absorbs any record in flight at close.
    async fn consume_step(&mut self) -> Result<Value, KasockiError> {
        loop {
            let record = match self.broker.poll(self.config.poll_max_wait()).await {
                Ok(record) => record,
                Err(error) if error.is_transient() => {
                    trace!("session: {} poll idle ({error}), retrying", self.id);
                    tokio::time::sleep(self.config.consume_retry_interval()).await;
                    continue;
                }
                Err(error) => {
                    error!("session: {} broker poll failed: {error}", self.id);
                    return Err(error.into());
                }
            };
            let message = match self.deserializer.deserialize(&record) {
                Ok(message) => message,
                Err(error) => {
                    warn!("session: {} skipping record: {error}", self.id);
                    continue;
                }
            };
            if let Some(matcher) = &self.matcher {
                let matched = matcher.matches(&message);
                for anomaly in matcher.drain_errors() {
                    debug!("session: {} matcher anomaly: {anomaly}", self.id);
                }
                if !matched {
                    continue;
                }
            }
            return Ok(message);
        }
    }

    /// Routes one pipeline result: to the oldest parked pull ack if any,
    /// otherwise to a push `message` event. A hard error answers the
    /// parked ack (or the `err` channel) and halts push delivery; the
    /// session stays open.
    async fn deliver(&mut self, step: Result<Value, KasockiError>) {
        match step {
            Ok(message) => {
                self.metrics.increment("message");
                if let Some(ack) = self.pending_consumes.pop_front() {
                    if let Some(id) = ack {
                        self.emit(ServerEvent::Ack { id, data: message }).await;
                    }
                } else if self.running {
                    self.emit(ServerEvent::Message { data: message }).await;
                }
            }
            Err(error) => {
                let ack = self.pending_consumes.pop_front().flatten();
                self.running = false;
                self.fail(ack, &error, "consume").await;
            }
        }
    }

    async fn fail(&mut self, ack: Option<String>, error: &KasockiError, event: &str) {
        debug!("session: {}, event {event} failed: {error}", self.id);
        let wire = error.to_wire(&self.id, event);
        self.emit(ServerEvent::Err {
            id: ack,
            error: wire,
        })
        .await;
    }

    async fn emit(&mut self, event: ServerEvent) {
        if let Err(error) = self.emitter.emit(event).await {
            warn!("session: {} {error}, closing", self.id);
            self.close().await;
        }
    }

    /// Terminal transition: stops delivery, drops parked acks and releases
    /// the broker handle exactly once.
    async fn close(&mut self) {
        if self.closing {
            return;
        }
        self.closing = true;
        self.running = false;
        self.pending_consumes.clear();
        self.broker.disconnect().await;
        info!("session: {} closed", self.id);
    }
}

impl<E: SocketEmitter> fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("subscribed", &self.subscribed)
            .field("running", &self.running)
            .field("closing", &self.closing)
            .field("assignments", &self.assignments)
            .field("pending_consumes", &self.pending_consumes.len())
            .finish()
    }
}
