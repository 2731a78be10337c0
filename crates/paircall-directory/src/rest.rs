//! Realtime database REST backend.
//!
//! Every path maps to `{base_url}/{path}.json`. Subscriptions hold a
//! `text/event-stream` response open and replay `put`/`patch` events onto
//! a cached copy of the subscribed value, reconnecting with backoff when
//! the stream drops.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::directory::{split_path, Directory, Subscription};
use crate::error::{DirectoryError, Result};
use crate::sse::{apply_event, SseDecoder, StreamControl};

const RECONNECT_INITIAL: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct RestDirectory {
    client: Client,
    base_url: String,
    auth: Option<String>,
}

impl RestDirectory {
    /// `base_url` is the database root, e.g. `https://example.firebaseio.com`.
    /// `auth` is appended as the `auth` query parameter when present.
    pub fn new(base_url: impl Into<String>, auth: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client, base_url, auth))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, auth: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    fn url(&self, path: &str) -> Result<String> {
        let segs = split_path(path)?;
        Ok(format!("{}/{}.json", self.base_url, segs.join("/")))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let mut builder = self.client.request(method, self.url(path)?);
        if let Some(auth) = &self.auth {
            builder = builder.query(&[("auth", auth.as_str())]);
        }
        Ok(builder)
    }

    async fn open_stream(&self, path: &str) -> Result<Response> {
        let response = self
            .request(Method::GET, path)?
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;
        Ok(response)
    }
}

#[async_trait]
impl Directory for RestDirectory {
    async fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .request(Method::GET, path)?
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.request(Method::PUT, path)?
            .json(&value)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.request(Method::DELETE, path)?
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription> {
        // First connection is made eagerly so bad URLs fail the call.
        let response = self.open_stream(path).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let this = self.clone();
        let path = path.to_string();
        tokio::spawn(async move {
            this.stream_loop(path, response, tx).await;
        });
        Ok(Subscription::new(rx))
    }

    async fn query_children_eq(
        &self,
        path: &str,
        field: &str,
        equals: &Value,
    ) -> Result<Vec<(String, Value)>> {
        let order_by = Value::String(field.to_string()).to_string();
        let equal_to = equals.to_string();
        let response = self
            .request(Method::GET, path)?
            .query(&[("orderBy", order_by.as_str()), ("equalTo", equal_to.as_str())])
            .send()
            .await?
            .error_for_status()?;
        match response.json::<Value>().await? {
            Value::Null => Ok(Vec::new()),
            Value::Object(children) => Ok(children.into_iter().collect()),
            other => Err(DirectoryError::UnexpectedResponse(format!(
                "query returned non-object: {other}"
            ))),
        }
    }
}

impl RestDirectory {
    async fn stream_loop(self, path: String, first: Response, tx: mpsc::UnboundedSender<Value>) {
        let mut response = Some(first);
        let mut backoff = RECONNECT_INITIAL;
        let mut last_sent: Option<Value> = None;

        loop {
            let current = match response.take() {
                Some(r) => r,
                None => {
                    tokio::select! {
                        _ = tx.closed() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(RECONNECT_MAX);
                    match self.open_stream(&path).await {
                        Ok(r) => {
                            info!(path = %path, "directory stream reconnected");
                            r
                        }
                        Err(e) => {
                            warn!(path = %path, error = %e, "directory stream reconnect failed");
                            continue;
                        }
                    }
                }
            };

            match read_stream(current, &tx, &mut last_sent, &mut backoff).await {
                StreamEnd::ReceiverGone => return,
                StreamEnd::Closed => {
                    warn!(path = %path, "directory closed the stream");
                    return;
                }
                StreamEnd::Dropped => {
                    debug!(path = %path, "directory stream dropped, reconnecting");
                }
            }
        }
    }
}

enum StreamEnd {
    ReceiverGone,
    Closed,
    Dropped,
}

async fn read_stream(
    response: Response,
    tx: &mpsc::UnboundedSender<Value>,
    last_sent: &mut Option<Value>,
    backoff: &mut Duration,
) -> StreamEnd {
    let mut body = Box::pin(response.bytes_stream());
    let mut decoder = SseDecoder::default();
    // Each connection starts with a full `put` of the current value.
    let mut cache = Value::Null;

    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => return StreamEnd::ReceiverGone,
            chunk = body.next() => chunk,
        };
        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                debug!(error = %e, "directory stream read failed");
                return StreamEnd::Dropped;
            }
            None => return StreamEnd::Dropped,
        };

        for event in decoder.feed(&bytes) {
            match apply_event(&mut cache, &event) {
                Ok(StreamControl::Updated) => {
                    *backoff = RECONNECT_INITIAL;
                    if last_sent.as_ref() != Some(&cache) {
                        if tx.send(cache.clone()).is_err() {
                            return StreamEnd::ReceiverGone;
                        }
                        *last_sent = Some(cache.clone());
                    }
                }
                Ok(StreamControl::Ignored) => {}
                Ok(StreamControl::Closed) => return StreamEnd::Closed,
                Err(e) => warn!(event = %event.event, error = %e, "bad directory stream event"),
            }
        }
    }
}
