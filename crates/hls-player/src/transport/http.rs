use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use reqwest::Client;
use reqwest::header::HeaderMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{Completion, RequestId, RequestOptions, Response, TransferError, Transport};
use crate::PlayerError;
use crate::config::HttpConfig;

pub type CompletionReceiver = mpsc::UnboundedReceiver<(RequestId, Completion)>;

pub fn create_client(config: &HttpConfig) -> Result<Client, PlayerError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    client_builder.build().map_err(PlayerError::from)
}

/// [`Transport`] on top of reqwest.
///
/// Every request runs on its own tokio task and reports back through the
/// completion channel returned by [`ReqwestTransport::new`]. Clones share the
/// id space, the channel and the set of in-flight requests, so one receiver
/// serves every loader. `request` must be called from within a tokio runtime.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    credential_headers: HeaderMap,
    next_id: Arc<AtomicU64>,
    completions: mpsc::UnboundedSender<(RequestId, Completion)>,
    in_flight: Arc<Mutex<HashMap<RequestId, CancellationToken>>>,
}

impl ReqwestTransport {
    pub fn new(config: &HttpConfig) -> Result<(Self, CompletionReceiver), PlayerError> {
        let client = create_client(config)?;
        Ok(Self::with_client(client, config.credential_headers.clone()))
    }

    pub fn with_client(client: Client, credential_headers: HeaderMap) -> (Self, CompletionReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            client,
            credential_headers,
            next_id: Arc::new(AtomicU64::new(1)),
            completions: tx,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        };
        (transport, rx)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Fetches `url` directly, bypassing the completion channel.
    pub async fn fetch_text(&self, url: &str) -> Result<String, PlayerError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        debug!(url, status = %response.status(), "Fetched text");
        Ok(response.text().await?)
    }

    /// Number of requests that have not completed yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

impl Transport for ReqwestTransport {
    fn request(&mut self, options: RequestOptions) -> RequestId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.in_flight.lock().insert(id, token.clone());

        let client = self.client.clone();
        let credential_headers = options
            .with_credentials
            .then(|| self.credential_headers.clone());
        let in_flight = Arc::clone(&self.in_flight);
        let completions = self.completions.clone();

        trace!(id, uri = %options.uri, "Issuing request");
        tokio::spawn(async move {
            let completion = tokio::select! {
                biased;
                _ = token.cancelled() => Err(TransferError::Aborted),
                result = perform(client, options, credential_headers) => result,
            };
            in_flight.lock().remove(&id);
            if completions.send((id, completion)).is_err() {
                debug!(id, "Completion receiver dropped");
            }
        });
        id
    }

    fn abort(&mut self, id: RequestId) {
        if let Some(token) = self.in_flight.lock().remove(&id) {
            trace!(id, "Aborting request");
            token.cancel();
        }
    }
}

async fn perform(
    client: Client,
    options: RequestOptions,
    credential_headers: Option<HeaderMap>,
) -> Completion {
    let started = Instant::now();
    let mut request_builder = client
        .request(options.method.clone(), options.uri.as_str())
        .headers(options.headers);
    if let Some(headers) = credential_headers {
        request_builder = request_builder.headers(headers);
    }
    if let Some(timeout) = options.timeout {
        request_builder = request_builder.timeout(timeout);
    }

    let response = request_builder.send().await.map_err(map_reqwest_error)?;
    let status = response.status();
    if !status.is_success() {
        let response_text = response.text().await.ok();
        return Err(TransferError::Failed {
            status: Some(status.as_u16()),
            message: format!("HTTP {status}"),
            response_text,
        });
    }

    let body = response.bytes().await.map_err(map_reqwest_error)?;
    Ok(Response::new(status.as_u16(), body, started.elapsed()))
}

fn map_reqwest_error(e: reqwest::Error) -> TransferError {
    if e.is_timeout() {
        TransferError::TimedOut
    } else {
        TransferError::Failed {
            status: e.status().map(|status| status.as_u16()),
            message: e.to_string(),
            response_text: None,
        }
    }
}
