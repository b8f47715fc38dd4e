//! HTTP tile fetcher.
//!
//! Each request spawns a download task on the Tokio runtime the fetcher was
//! created in. Downloads race a per-request [`CancellationToken`]; cancelled
//! downloads report nothing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{FetchError, FetchReporter, Fetcher};
use crate::tile::{TileFormat, TileId};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// HTTP GET abstraction, so downloads can be faked in tests.
pub trait HttpClient: Send + Sync + 'static {
    /// Fetch `url` and return the response body.
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes, FetchError>>;
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client with the default timeout.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    /// Creates a client with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tilecache/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(async move {
            let response = self.client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }
            Ok(response.bytes().await?)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Provider,
    MapId,
    Zoom,
    X,
    Y,
    Version,
}

/// Tile URL template.
///
/// Placeholders: `{provider}`, `{map_id}`, `{zoom}` (or `{z}`), `{x}`, `{y}`
/// and `{version}`.
///
/// # Example
///
/// ```
/// use tilecache::fetcher::UrlTemplate;
/// use tilecache::tile::TileId;
///
/// let template = UrlTemplate::parse("https://tile.example.org/{z}/{x}/{y}.png").unwrap();
/// let id = TileId::new("osm", 0, 3, 4, 5);
/// assert_eq!(template.render(&id), "https://tile.example.org/3/4/5.png");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl UrlTemplate {
    /// Parse a template, rejecting unknown or unterminated placeholders.
    pub fn parse(template: &str) -> Result<Self, FetchError> {
        let mut segments = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                FetchError::InvalidTemplate(format!("unterminated placeholder in '{}'", template))
            })?;
            let segment = match &after[..close] {
                "provider" => Segment::Provider,
                "map_id" => Segment::MapId,
                "zoom" | "z" => Segment::Zoom,
                "x" => Segment::X,
                "y" => Segment::Y,
                "version" => Segment::Version,
                other => {
                    return Err(FetchError::InvalidTemplate(format!(
                        "unknown placeholder '{{{}}}'",
                        other
                    )))
                }
            };
            segments.push(segment);
            rest = &after[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Substitute `id`'s fields.
    pub fn render(&self, id: &TileId) -> String {
        let mut url = String::with_capacity(self.source.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => url.push_str(text),
                Segment::Provider => url.push_str(id.provider()),
                Segment::MapId => url.push_str(&id.map_id().to_string()),
                Segment::Zoom => url.push_str(&id.zoom().to_string()),
                Segment::X => url.push_str(&id.x().to_string()),
                Segment::Y => url.push_str(&id.y().to_string()),
                Segment::Version => url.push_str(&id.version().to_string()),
            }
        }
        url
    }
}

/// [`Fetcher`] that downloads tiles over HTTP.
pub struct HttpFetcher<C = ReqwestClient> {
    client: Arc<C>,
    template: UrlTemplate,
    format: TileFormat,
    reporter: FetchReporter,
    in_flight: Arc<DashMap<TileId, (u64, CancellationToken)>>,
    next_generation: u64,
    runtime: Handle,
}

impl HttpFetcher<ReqwestClient> {
    /// Create a fetcher using `reqwest`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `template` - URL template for tiles
    /// * `format` - Format tag reported for every payload
    /// * `reporter` - Where results are posted
    pub fn new(
        template: UrlTemplate,
        format: TileFormat,
        reporter: FetchReporter,
    ) -> Result<Self, FetchError> {
        Self::with_client(ReqwestClient::new()?, template, format, reporter)
    }
}

impl<C: HttpClient> HttpFetcher<C> {
    /// Create a fetcher with a custom HTTP client.
    pub fn with_client(
        client: C,
        template: UrlTemplate,
        format: TileFormat,
        reporter: FetchReporter,
    ) -> Result<Self, FetchError> {
        let runtime = Handle::try_current().map_err(|_| FetchError::NoRuntime)?;
        Ok(Self {
            client: Arc::new(client),
            template,
            format,
            reporter,
            in_flight: Arc::new(DashMap::new()),
            next_generation: 0,
            runtime,
        })
    }

    /// Number of downloads currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

impl<C: HttpClient> Fetcher for HttpFetcher<C> {
    fn request(&mut self, id: &TileId) {
        let url = self.template.render(id);
        let token = CancellationToken::new();
        let generation = self.next_generation;
        self.next_generation += 1;

        if let Some((_, previous)) = self
            .in_flight
            .insert(id.clone(), (generation, token.clone()))
        {
            previous.cancel();
        }

        let client = Arc::clone(&self.client);
        let reporter = self.reporter.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let format = self.format.clone();
        let id = id.clone();

        trace!(tile = %id, url = %url, "Starting download");
        self.runtime.spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => None,
                result = client.get(&url) => Some(result),
            };
            in_flight.remove_if(&id, |_, (current, _)| *current == generation);

            match result {
                None => trace!(tile = %id, "Download cancelled"),
                Some(Ok(bytes)) => reporter.fetched(id, bytes, format),
                Some(Err(e)) => {
                    debug!(tile = %id, url = %url, error = %e, "Download failed");
                    reporter.failed(id, e.to_string());
                }
            }
        });
    }

    fn cancel(&mut self, id: &TileId) {
        if let Some((_, (_, token))) = self.in_flight.remove(id) {
            token.cancel();
        }
    }
}

impl<C> Drop for HttpFetcher<C> {
    fn drop(&mut self) {
        for entry in self.in_flight.iter() {
            entry.value().1.cancel();
        }
    }
}
