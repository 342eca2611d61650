//! HttpStore: the cluster REST API over plain HTTP.
//!
//! Intended to sit behind `kubectl proxy` (or an equivalent
//! authenticating proxy), so requests carry no credentials of their own.
//! Paths follow `{api_root}/api/v1/namespaces/{namespace}/{kind}[/{name}]`.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use futures_util::{StreamExt, TryStreamExt};
use http::{Method, Request, Response, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};
use url::Url;

use crate::client::{LineStream, LogOptions, RawWatchStream, ResourceStore, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::selector::LabelSelector;
use crate::types::{RawWatchEvent, ResourceKind};

const JSON: &str = "application/json";
const MERGE_PATCH: &str = "application/merge-patch+json";

/// Longest watch event or log line accepted from a streamed body.
const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

type HttpClient = Client<HttpConnector, Full<Bytes>>;

#[derive(Clone)]
pub struct HttpStore {
    client: HttpClient,
    config: StoreConfig,
}

impl HttpStore {
    pub fn new(config: StoreConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self { client, config }
    }

    fn collection_url(&self, kind: ResourceKind) -> StoreResult<Url> {
        let raw = format!(
            "{}/api/v1/namespaces/{}/{}",
            self.config.api_root,
            self.config.namespace,
            kind.path()
        );
        Url::parse(&raw)
            .map_err(|e| StoreError::invalid(format!("bad api root `{}`: {e}", self.config.api_root)))
    }

    fn object_url(&self, kind: ResourceKind, name: &str) -> StoreResult<Url> {
        push_segment(self.collection_url(kind)?, name)
    }

    async fn send(
        &self,
        method: Method,
        url: &Url,
        body: Option<(&str, Value)>,
    ) -> StoreResult<Response<Incoming>> {
        let builder = Request::builder()
            .method(method.clone())
            .uri(url.as_str())
            .header(header::ACCEPT, JSON);
        let request = match body {
            Some((content_type, value)) => {
                let bytes =
                    serde_json::to_vec(&value).map_err(|e| StoreError::decode(e.to_string()))?;
                builder
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Full::new(Bytes::from(bytes)))
            }
            None => builder.body(Full::new(Bytes::new())),
        }
        .map_err(|e| StoreError::invalid(format!("bad request for {url}: {e}")))?;

        debug!(%method, %url, "store request");
        self.client
            .request(request)
            .await
            .map_err(|e| StoreError::network(format!("{method} {url}: {e}")))
    }

    /// One request/response exchange, body included, bounded by the
    /// configured request timeout.
    async fn call(
        &self,
        method: Method,
        url: &Url,
        body: Option<(&str, Value)>,
    ) -> StoreResult<(StatusCode, Bytes)> {
        let timeout = self.config.request_timeout;
        let exchange = async {
            let response = self.send(method.clone(), url, body).await?;
            let status = response.status();
            Ok::<_, StoreError>((status, read_body(response).await?))
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| timed_out(&method, url, timeout))?
    }

    /// Send a request and decode a JSON response, mapping non-2xx to errors.
    async fn request_json(
        &self,
        method: Method,
        url: &Url,
        body: Option<(&str, Value)>,
    ) -> StoreResult<Value> {
        let (status, bytes) = self.call(method, url, body).await?;
        if !status.is_success() {
            return Err(StoreError::from_response(status.as_u16(), &bytes));
        }
        serde_json::from_slice(&bytes).map_err(|e| StoreError::decode(e.to_string()))
    }

    /// Open a long-lived GET. Only the wait for the response head is
    /// bounded; the body streams for as long as the server keeps it open.
    async fn open_stream(&self, url: &Url) -> StoreResult<Incoming> {
        let timeout = self.config.request_timeout;
        let response = tokio::time::timeout(timeout, self.send(Method::GET, url, None))
            .await
            .map_err(|_| timed_out(&Method::GET, url, timeout))??;
        let status = response.status();
        if !status.is_success() {
            let bytes = tokio::time::timeout(timeout, read_body(response))
                .await
                .map_err(|_| timed_out(&Method::GET, url, timeout))??;
            return Err(StoreError::from_response(status.as_u16(), &bytes));
        }
        Ok(response.into_body())
    }
}

async fn read_body(response: Response<Incoming>) -> StoreResult<Bytes> {
    Ok(response
        .into_body()
        .collect()
        .await
        .map_err(|e| StoreError::network(format!("reading response body: {e}")))?
        .to_bytes())
}

fn timed_out(method: &Method, url: &Url, timeout: Duration) -> StoreError {
    StoreError::network(format!(
        "{method} {url}: no response within {:.1}s",
        timeout.as_secs_f64()
    ))
}

#[async_trait]
impl ResourceStore for HttpStore {
    fn namespace(&self) -> &str {
        &self.config.namespace
    }

    async fn ping(&self) -> StoreResult<()> {
        let url = push_segment(
            Url::parse(&self.config.api_root)
                .map_err(|e| StoreError::invalid(format!("bad api root `{}`: {e}", self.config.api_root)))?,
            "api",
        )?;
        let (status, bytes) = self.call(Method::GET, &url, None).await?;
        if status.is_success() {
            return Ok(());
        }
        Err(StoreError::from_response(status.as_u16(), &bytes))
    }

    async fn get(&self, kind: ResourceKind, name: &str) -> StoreResult<Value> {
        self.request_json(Method::GET, &self.object_url(kind, name)?, None)
            .await
    }

    async fn list(&self, kind: ResourceKind, selector: &LabelSelector) -> StoreResult<Vec<Value>> {
        let selector = selector.to_string();
        let url = with_query(
            self.collection_url(kind)?,
            &[("labelSelector", Some(selector.as_str()))],
        );
        let body = self.request_json(Method::GET, &url, None).await?;
        match body.get("items") {
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(other) => Err(StoreError::decode(format!(
                "list items is not an array: {other}"
            ))),
        }
    }

    async fn create(&self, kind: ResourceKind, object: Value) -> StoreResult<Value> {
        self.request_json(Method::POST, &self.collection_url(kind)?, Some((JSON, object)))
            .await
    }

    async fn replace(&self, kind: ResourceKind, name: &str, object: Value) -> StoreResult<Value> {
        self.request_json(Method::PUT, &self.object_url(kind, name)?, Some((JSON, object)))
            .await
    }

    async fn patch(&self, kind: ResourceKind, name: &str, patch: Value) -> StoreResult<Value> {
        self.request_json(
            Method::PATCH,
            &self.object_url(kind, name)?,
            Some((MERGE_PATCH, patch)),
        )
        .await
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> StoreResult<()> {
        let (status, bytes) = self
            .call(Method::DELETE, &self.object_url(kind, name)?, None)
            .await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(StoreError::from_response(status.as_u16(), &bytes))
        }
    }

    async fn watch(
        &self,
        kind: ResourceKind,
        selector: &LabelSelector,
        resource_version: Option<&str>,
    ) -> StoreResult<RawWatchStream> {
        let selector = selector.to_string();
        let url = with_query(
            self.collection_url(kind)?,
            &[
                ("watch", Some("true")),
                ("labelSelector", Some(selector.as_str())),
                ("resourceVersion", resource_version),
            ],
        );
        let body = self.open_stream(&url).await?;
        let events = body_lines(data_chunks(body), MAX_LINE_BYTES).filter_map(|line| async move {
            match line {
                Ok(line) => parse_event(&line),
                Err(e) => {
                    warn!(error = %e, "watch stream broke");
                    Some(Err(e))
                }
            }
        });
        Ok(Box::pin(events))
    }

    async fn pod_logs(&self, name: &str, options: &LogOptions) -> StoreResult<LineStream> {
        let url = push_segment(self.object_url(ResourceKind::Pods, name)?, "log")?;
        let tail_lines = options.tail_lines.map(|n| n.to_string());
        let url = with_query(
            url,
            &[
                ("container", options.container.as_deref()),
                ("follow", options.follow.then_some("true")),
                ("tailLines", tail_lines.as_deref()),
            ],
        );
        let body = self.open_stream(&url).await?;
        Ok(Box::pin(body_lines(data_chunks(body), MAX_LINE_BYTES)))
    }
}

fn data_chunks(body: Incoming) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    body.into_data_stream().map_err(io::Error::other)
}

/// Split a streamed body into lines no longer than `max_len` bytes.
fn body_lines<S>(chunks: S, max_len: usize) -> impl Stream<Item = StoreResult<String>> + Send + 'static
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    FramedRead::new(
        StreamReader::new(chunks),
        LinesCodec::new_with_max_length(max_len),
    )
    .map(move |line| {
        line.map_err(|e| match e {
            LinesCodecError::MaxLineLengthExceeded => {
                StoreError::decode(format!("streamed line exceeds {max_len} bytes"))
            }
            LinesCodecError::Io(e) => StoreError::network(format!("response stream: {e}")),
        })
    })
}

fn parse_event(line: &str) -> Option<StoreResult<RawWatchEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line).map_err(|e| StoreError::decode(e.to_string())))
}

/// Append one percent-encoded path segment.
fn push_segment(mut url: Url, segment: &str) -> StoreResult<Url> {
    if url.cannot_be_a_base() {
        return Err(StoreError::invalid(format!("`{url}` cannot take a path")));
    }
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(segment);
    }
    Ok(url)
}

/// Append query parameters, skipping absent and empty values.
fn with_query(mut url: Url, params: &[(&str, Option<&str>)]) -> Url {
    let present: Vec<(&str, &str)> = params
        .iter()
        .filter_map(|&(key, value)| value.filter(|v| !v.is_empty()).map(|v| (key, v)))
        .collect();
    if !present.is_empty() {
        url.query_pairs_mut().extend_pairs(present);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Api, LogOptions};
    use crate::error::ErrorKind;
    use crate::types::{ReplicationController, Secret, WatchEvent};
    use futures_util::StreamExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serve one canned HTTP/1.1 response and report the request head.
    async fn serve_once(status: &str, chunks: Vec<&'static str>) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let status = status.to_string();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut byte = [0u8; 1];
            while !head.ends_with(b"\r\n\r\n") {
                if socket.read(&mut byte).await.unwrap() == 0 {
                    break;
                }
                head.push(byte[0]);
            }
            let _ = tx.send(String::from_utf8_lossy(&head).to_string());
            let preamble = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\nconnection: close\r\n\r\n"
            );
            socket.write_all(preamble.as_bytes()).await.unwrap();
            for chunk in chunks {
                socket.write_all(chunk.as_bytes()).await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            let _ = socket.shutdown().await;
        });
        (format!("http://{addr}"), rx)
    }

    #[test]
    fn urls_follow_namespaced_layout() {
        let store = HttpStore::new(StoreConfig::new("http://localhost:8001", "skiffapp"));
        assert_eq!(
            store
                .object_url(ResourceKind::ReplicationControllers, "web-v1-0")
                .unwrap()
                .as_str(),
            "http://localhost:8001/api/v1/namespaces/skiffapp/replicationcontrollers/web-v1-0"
        );
    }

    #[test]
    fn query_values_are_escaped() {
        let base = Url::parse("http://h/api").unwrap();
        let url = with_query(
            base.clone(),
            &[
                ("labelSelector", Some("app=web,build-version!=v2-0")),
                ("resourceVersion", None),
            ],
        );
        assert_eq!(
            url.as_str(),
            "http://h/api?labelSelector=app%3Dweb%2Cbuild-version%21%3Dv2-0"
        );
        assert_eq!(with_query(base, &[("labelSelector", Some(""))]).as_str(), "http://h/api");
    }

    #[test]
    fn object_names_are_one_path_segment() {
        let url = push_segment(Url::parse("http://h/api/v1/namespaces/skiff/secrets").unwrap(), "a/b c").unwrap();
        assert_eq!(url.as_str(), "http://h/api/v1/namespaces/skiff/secrets/a%2Fb%20c");
    }

    #[tokio::test]
    async fn body_lines_reassemble_chunks_and_bound_length() {
        let chunks = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"first li")),
            Ok(Bytes::from_static(b"ne\n\nsecond line\nno newline at end")),
        ]);
        let lines: Vec<String> = body_lines(chunks, 64)
            .map(|line| line.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["first line", "", "second line", "no newline at end"]);

        let oversized = futures_util::stream::iter(vec![Ok(Bytes::from(format!("{}\n", "x".repeat(40))))]);
        let mut lines = Box::pin(body_lines(oversized, 16));
        let err = lines.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Decode);
    }

    #[tokio::test]
    async fn silent_server_times_out_as_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and never answer.
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        });
        let config = StoreConfig::new(&format!("http://{addr}"), "skiffapp")
            .with_request_timeout(std::time::Duration::from_millis(100));
        let store = HttpStore::new(config);

        let started = std::time::Instant::now();
        let err = Api::<Secret>::new(&store).get("web").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NetworkError);
        assert!(err.is_transient());
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn pod_logs_stream_lines() {
        let (root, head) = serve_once(
            "200 OK",
            vec!["listening on :8080\nGET / 200\n", "GET /health 200\n"],
        )
        .await;
        let store = HttpStore::new(StoreConfig::new(&root, "skiffapp"));
        let options = LogOptions {
            container: Some("app".to_string()),
            tail_lines: Some(50),
            follow: false,
        };

        let lines: Vec<String> = store
            .pod_logs("web-v1-0-x7k2p", &options)
            .await
            .unwrap()
            .map(|line| line.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["listening on :8080", "GET / 200", "GET /health 200"]);

        let head = head.await.unwrap();
        assert!(head.starts_with(
            "GET /api/v1/namespaces/skiffapp/pods/web-v1-0-x7k2p/log?container=app&tailLines=50 "
        ));
    }

    #[tokio::test]
    async fn not_found_carries_status_body() {
        let body = r#"{"kind":"Status","status":"Failure","message":"secrets \"ssh-keys\" not found","reason":"NotFound","code":404}"#;
        let (root, _head) = serve_once("404 Not Found", vec![body]).await;
        let store = HttpStore::new(StoreConfig::new(&root, "skiff"));

        let err = Api::<Secret>::new(&store).get("ssh-keys").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.status, Some(404));
        assert!(err.message.contains("ssh-keys"));
    }

    #[tokio::test]
    async fn list_sends_selector_and_decodes_items() {
        let body = r#"{"kind":"ReplicationControllerList","items":[{"metadata":{"name":"web-v1-0","labels":{"app":"web"}},"spec":{"replicas":2}}]}"#;
        let (root, head) = serve_once("200 OK", vec![body]).await;
        let store = HttpStore::new(StoreConfig::new(&root, "skiffapp"));

        let selector = LabelSelector::eq("app", "web").unwrap();
        let items = Api::<ReplicationController>::new(&store).list(&selector).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].spec.replicas, 2);

        let head = head.await.unwrap();
        assert!(head.starts_with(
            "GET /api/v1/namespaces/skiffapp/replicationcontrollers?labelSelector=app%3Dweb "
        ));
    }

    #[tokio::test]
    async fn watch_splits_events_across_chunks() {
        let (root, head) = serve_once(
            "200 OK",
            vec![
                "{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"name\":\"ssh-keys\",\"resourceVersion\":\"7\"}}}\n{\"type\":\"MOD",
                "IFIED\",\"object\":{\"metadata\":{\"name\":\"ssh-keys\",\"resourceVersion\":\"8\"},\"data\":{\"a\":\"aw==\"}}}\n",
            ],
        )
        .await;
        let store = HttpStore::new(StoreConfig::new(&root, "skiff"));
        let selector = LabelSelector::eq("type", "ssh-keys").unwrap();
        let mut stream = Api::<Secret>::new(&store)
            .watch(&selector, Some("6"))
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, WatchEvent::Added(_)));
        match stream.next().await.unwrap().unwrap() {
            WatchEvent::Modified(s) => {
                assert_eq!(s.metadata.resource_version.as_deref(), Some("8"));
                assert_eq!(s.data["a"], b"k");
            }
            other => panic!("expected MODIFIED, got {other:?}"),
        }
        assert!(stream.next().await.is_none());

        let head = head.await.unwrap();
        assert!(head.contains("watch=true"));
        assert!(head.contains("resourceVersion=6"));
    }

    #[tokio::test]
    async fn refused_connection_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let store = HttpStore::new(StoreConfig::new(&format!("http://{addr}"), "skiff"));
        let err = store.ping().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NetworkError);
        assert!(err.is_transient());
    }
}
