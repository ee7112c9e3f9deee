//! REST + event-stream client for a Firebase-style realtime database

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::sse::{SseDecoder, SseEvent};
use super::tree;
use super::{RemoteSource, SnapshotStream};
use crate::error::{Error, Result};
use crate::util::{compact_text, is_http_url, normalize_text_option, path_segments};

#[derive(Clone)]
pub struct RealtimeDbClient {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for RealtimeDbClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RealtimeDbClient")
            .field("base_url", &self.base_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl RealtimeDbClient {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Result<Self> {
        let base_url = normalize_text_option(Some(base_url.into()))
            .ok_or_else(|| Error::Config("remote URL must not be empty".to_string()))?;
        if !is_http_url(&base_url) {
            return Err(Error::Config(
                "remote URL must include http:// or https://".to_string(),
            ));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: normalize_text_option(auth_token),
            client: reqwest::Client::builder().build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        let encoded = path_segments(path)
            .into_iter()
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if encoded.is_empty() {
            format!("{}/.json", self.base_url)
        } else {
            format!("{}/{encoded}.json", self.base_url)
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.query(&[("auth", token)]),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.authorized(request).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Remote(parse_api_error(status, &body)))
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.error {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    path: String,
    data: Value,
}

/// Subscriber-side state for one event stream.
struct EventStreamState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    tree: Value,
    finished: bool,
}

/// What a decoded event means for the subscriber.
#[derive(Debug, PartialEq)]
enum FrameOutcome {
    Changed,
    Ignored,
    Closed(String),
}

fn apply_event(tree: &mut Value, event: &SseEvent) -> Result<FrameOutcome> {
    match event.event.as_str() {
        "put" | "patch" => {
            let frame: StreamFrame = serde_json::from_str(&event.data)?;
            if event.event == "put" {
                tree::set_at(tree, &frame.path, frame.data);
            } else {
                let Value::Object(fields) = frame.data else {
                    return Err(Error::Subscription(format!(
                        "patch at '{}' did not carry an object",
                        frame.path
                    )));
                };
                tree::merge_at(tree, &frame.path, fields);
            }
            Ok(FrameOutcome::Changed)
        }
        "keep-alive" => Ok(FrameOutcome::Ignored),
        "cancel" | "auth_revoked" => Ok(FrameOutcome::Closed(format!(
            "{}: {}",
            event.event,
            compact_text(&event.data)
        ))),
        other => {
            tracing::debug!("Ignoring unknown event-stream event '{other}'");
            Ok(FrameOutcome::Ignored)
        }
    }
}

impl EventStreamState {
    fn current(&self) -> Option<Value> {
        if self.tree.is_null() {
            None
        } else {
            Some(self.tree.clone())
        }
    }

    async fn next_snapshot(mut self) -> Option<(Result<Option<Value>>, Self)> {
        loop {
            if self.finished {
                return None;
            }

            if let Some(event) = self.pending.pop_front() {
                match apply_event(&mut self.tree, &event) {
                    Ok(FrameOutcome::Changed) => {
                        let snapshot = self.current();
                        return Some((Ok(snapshot), self));
                    }
                    Ok(FrameOutcome::Ignored) => {}
                    Ok(FrameOutcome::Closed(reason)) => {
                        self.finished = true;
                        return Some((Err(Error::Subscription(reason)), self));
                    }
                    Err(error) => return Some((Err(error), self)),
                }
                continue;
            }

            match self.body.next().await {
                Some(Ok(chunk)) => {
                    let events = self.decoder.push(&chunk);
                    self.pending.extend(events);
                }
                Some(Err(error)) => {
                    self.finished = true;
                    return Some((Err(error.into()), self));
                }
                None => return None,
            }
        }
    }
}

#[async_trait]
impl RemoteSource for RealtimeDbClient {
    async fn fetch(&self, path: &str) -> Result<Option<Value>> {
        let response = self.send(self.client.get(self.url(path))).await?;
        let value = response.json::<Value>().await?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    async fn subscribe(&self, path: &str) -> Result<SnapshotStream> {
        let request = self
            .client
            .get(self.url(path))
            .header("Accept", "text/event-stream");
        let response = self.send(request).await?;
        tracing::debug!("Opened event stream for '{path}'");

        let state = EventStreamState {
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            tree: Value::Null,
            finished: false,
        };
        Ok(futures::stream::unfold(state, EventStreamState::next_snapshot).boxed())
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.send(self.client.put(self.url(path)).json(&value))
            .await?;
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        self.send(self.client.patch(self.url(path)).json(&fields))
            .await?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.send(self.client.delete(self.url(path))).await?;
        Ok(())
    }
}
