//! The `http` module provides `HttpTransport`, which enables repositories to
//! be loaded over HTTP.

use crate::transport::{Transport, TransportError, TransportErrorKind};
use log::debug;
use reqwest::blocking::{Client, ClientBuilder, Response};
use reqwest::header::{self, ACCEPT_RANGES};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::io::{self, Read};
use std::time::Duration;
use url::Url;

/// Settings for the HTTP client including retry strategy and timeouts.
#[derive(Clone, Copy, Debug)]
pub struct ClientSettings {
    /// Set a timeout for connect, read and write operations.
    pub timeout: Duration,
    /// Set a timeout for only the connect phase.
    pub connect_timeout: Duration,
    /// The total number of times we will try to get the response.
    pub tries: u32,
    /// The pause between the first and second try.
    pub initial_backoff: Duration,
    /// The maximum length of a pause between retries.
    pub max_backoff: Duration,
    /// The exponential backoff factor, the factor by which the pause time
    /// will increase after each try until reaching `max_backoff`.
    pub backoff_factor: f32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            tries: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            backoff_factor: 1.5,
        }
    }
}

/// An HTTP `Transport` with retry logic.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpTransport {
    settings: ClientSettings,
}

impl HttpTransport {
    /// Create a new `HttpTransport` with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `HttpTransport` with specific settings.
    pub fn from_settings(settings: ClientSettings) -> Self {
        Self { settings }
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, url: Url) -> Result<Box<dyn Read + Send>, TransportError> {
        let reader = HttpReader::open(&self.settings, url, 0)?;
        Ok(Box::new(reader))
    }

    /// Opens the response body at byte `start` via a `Range` header. A
    /// server that ignores the range would serve the whole file and corrupt
    /// a resumed download, so anything but `206 Partial Content` is
    /// reported as `UnsupportedRange`.
    fn fetch_from(&self, url: Url, start: u64) -> Result<Box<dyn Read + Send>, TransportError> {
        let reader = HttpReader::open(&self.settings, url.clone(), start)?;
        if start > 0 && reader.body.status() != StatusCode::PARTIAL_CONTENT {
            return Err(TransportError::new(
                TransportErrorKind::UnsupportedRange,
                &url,
                format!(
                    "the server answered a ranged request with status {}",
                    reader.body.status()
                ),
            ));
        }
        Ok(Box::new(reader))
    }
}

/// A streaming response body that transparently reconnects, with a `Range`
/// header picking up where it left off, when the connection drops
/// mid-read.
#[derive(Debug)]
pub struct HttpReader {
    client: Client,
    settings: ClientSettings,
    url: Url,
    /// Absolute offset of the next byte this reader will return.
    offset: u64,
    /// Mid-body reconnects remaining before read errors become final.
    reconnects_left: u32,
    body: Response,
}

impl HttpReader {
    fn open(settings: &ClientSettings, url: Url, offset: u64) -> Result<Self, TransportError> {
        let client = ClientBuilder::new()
            .timeout(settings.timeout)
            .connect_timeout(settings.connect_timeout)
            .redirect(Policy::limited(5))
            .build()
            .map_err(|err| TransportError::new(TransportErrorKind::Other, &url, err))?;
        let body = send_retried(&client, settings, &url, offset)?;
        Ok(Self {
            client,
            settings: *settings,
            url,
            offset,
            reconnects_left: settings.tries,
            body,
        })
    }

    /// Resuming mid-body needs the server to honor byte ranges, unless
    /// nothing has been consumed yet and a plain re-request is equivalent.
    fn can_resume(&self) -> bool {
        self.offset == 0
            || self
                .body
                .headers()
                .get(ACCEPT_RANGES)
                .and_then(|value| value.to_str().ok())
                .map_or(false, |value| value.contains("bytes"))
    }
}

impl Read for HttpReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let read_err = match self.body.read(buf) {
                Ok(count) => {
                    self.offset += count as u64;
                    return Ok(count);
                }
                Err(err) => err,
            };
            if self.reconnects_left == 0 || !self.can_resume() {
                return Err(read_err);
            }
            self.reconnects_left -= 1;
            debug!(
                "read of '{}' failed at byte {}, reconnecting: {}",
                self.url, self.offset, read_err
            );
            match send_retried(&self.client, &self.settings, &self.url, self.offset) {
                Ok(body) => self.body = body,
                // the reconnect failed as well; the read error is the one
                // worth reporting
                Err(_) => return Err(read_err),
            }
        }
    }
}

/// Issues a GET for `url` (with a `Range` header when `offset` is nonzero),
/// retrying with backoff until the response is usable or the tries are
/// exhausted. Connection-level failures and 5xx responses are retried;
/// anything else will not get better by asking again.
fn send_retried(
    client: &Client,
    settings: &ClientSettings,
    url: &Url,
    offset: u64,
) -> Result<Response, TransportError> {
    let mut backoff = Backoff::from(settings);
    loop {
        let err = match send_once(client, url, offset) {
            Ok(response) => return Ok(response),
            Err(err) => err,
        };
        let retryable = err.status().map_or(true, |status| status.is_server_error());
        match backoff.next() {
            Some(pause) if retryable => {
                debug!("GET '{}' failed, retrying in {:?}: {}", url, pause, err);
                std::thread::sleep(pause);
            }
            _ => return Err(classify(err, url)),
        }
    }
}

fn send_once(client: &Client, url: &Url, offset: u64) -> reqwest::Result<Response> {
    let mut request = client.get(url.as_str());
    if offset > 0 {
        request = request.header(header::RANGE, format!("bytes={}-", offset));
    }
    request.send()?.error_for_status()
}

/// Maps a final request failure onto the transport error kinds the update
/// engine dispatches on.
fn classify(err: reqwest::Error, url: &Url) -> TransportError {
    let kind = match err.status() {
        Some(StatusCode::NOT_FOUND) => TransportErrorKind::FileNotFound,
        _ => TransportErrorKind::Other,
    };
    TransportError::new(kind, url, err)
}

/// Yields the pause before each retry, growing exponentially up to the
/// configured ceiling. Exhaustion means the request is out of tries.
struct Backoff {
    pause: Duration,
    factor: f32,
    max_pause: Duration,
    tries_left: u32,
}

impl From<&ClientSettings> for Backoff {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            pause: settings.initial_backoff,
            factor: settings.backoff_factor,
            max_pause: settings.max_backoff,
            // the first attempt is not a retry
            tries_left: settings.tries.saturating_sub(1),
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.tries_left == 0 {
            return None;
        }
        self.tries_left -= 1;
        let pause = self.pause;
        self.pause = self.pause.mul_f32(self.factor).min(self.max_pause);
        Some(pause)
    }
}
