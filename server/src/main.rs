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

mod ws;

use anyhow::Context;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use clap::Parser;
use kasocki::{InMemoryBroker, SessionConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "kasocki-server",
    about = "Per-socket consumer sessions over a partitioned log, served over WebSocket."
)]
struct Args {
    /// Address to bind the HTTP/WebSocket listener on.
    #[arg(long, default_value = "127.0.0.1:6927")]
    bind: SocketAddr,
    /// Topics to create at startup, as NAME or NAME:PARTITIONS.
    #[arg(long = "topic", value_name = "NAME[:PARTITIONS]")]
    topics: Vec<String>,
    /// Optional TOML file holding the session configuration.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<InMemoryBroker>,
    pub session_config: SessionConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    Registry::default()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new("INFO")))
        .init();

    let args = Args::parse();
    let session_config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read config file {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("cannot parse config file {}", path.display()))?
        }
        None => SessionConfig::default(),
    };

    let broker = InMemoryBroker::new();
    for spec in &args.topics {
        let (name, partitions) = parse_topic_spec(spec)?;
        broker.create_topic(name, partitions);
        info!("created topic {name} with {partitions} partition(s)");
    }

    let state = AppState {
        broker,
        session_config,
    };
    let app = axum::Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/healthz", get(healthz))
        .route("/topics/{topic}/produce", post(produce))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("cannot bind {}", args.bind))?;
    info!("listening on {}", args.bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn parse_topic_spec(spec: &str) -> anyhow::Result<(&str, i32)> {
    match spec.split_once(':') {
        None => Ok((spec, 1)),
        Some((name, partitions)) => {
            let partitions: i32 = partitions
                .parse()
                .with_context(|| format!("invalid partition count in topic spec '{spec}'"))?;
            anyhow::ensure!(partitions > 0, "topic '{name}' needs at least one partition");
            Ok((name, partitions))
        }
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
struct ProduceRequest {
    #[serde(default)]
    partition: i32,
    key: Option<String>,
    value: Value,
}

#[derive(Debug, Serialize)]
struct ProduceResponse {
    topic: String,
    partition: i32,
    offset: i64,
}

/// Feeds the in-memory log, the companion to the WebSocket consume side.
async fn produce(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Json(request): Json<ProduceRequest>,
) -> Response {
    let payload = match serde_json::to_vec(&request.value) {
        Ok(payload) => Bytes::from(payload),
        Err(error) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": error.to_string()})),
            )
                .into_response();
        }
    };
    let key = request.key.map(|key| Bytes::from(key.into_bytes()));
    match state.broker.produce(&topic, request.partition, key, payload) {
        Ok(offset) => Json(ProduceResponse {
            topic,
            partition: request.partition,
            offset,
        })
        .into_response(),
        Err(error) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": error.to_string()})),
        )
            .into_response(),
    }
}
