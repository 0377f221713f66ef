//! Abstract request/response transport consumed by the loaders.
//!
//! The loaders never wait on I/O. They issue a request, keep the returned
//! [`RequestId`], and are later handed the matching [`Completion`] by the
//! host. A completion whose id no longer matches the stored one is stale and
//! ignored.

mod http;

use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::HeaderMap;

pub use http::{CompletionReceiver, ReqwestTransport, create_client};

/// Identity of an issued request.
pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Text,
    Bytes,
}

#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub uri: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    pub with_credentials: bool,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn get(uri: impl Into<String>, response_type: ResponseType) -> Self {
        Self {
            uri: uri.into(),
            method: Method::GET,
            headers: HeaderMap::new(),
            response_type,
            with_credentials: false,
            timeout: None,
        }
    }

    pub fn with_credentials(mut self, with_credentials: bool) -> Self {
        self.with_credentials = with_credentials;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Option<Bytes>,
    pub round_trip: Duration,
    pub bytes_received: u64,
    /// Bits per second observed for this transfer.
    pub bandwidth: f64,
}

impl Response {
    pub fn new(status: u16, body: Bytes, round_trip: Duration) -> Self {
        let bytes_received = body.len() as u64;
        let seconds = round_trip.as_secs_f64();
        let bandwidth = if seconds > 0.0 {
            bytes_received as f64 * 8.0 / seconds
        } else {
            0.0
        };
        Self {
            status,
            body: Some(body),
            round_trip,
            bytes_received,
            bandwidth,
        }
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|body| String::from_utf8_lossy(body).into_owned())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransferError {
    #[error("request timed out")]
    TimedOut,
    #[error("request aborted")]
    Aborted,
    #[error("request failed: {message}")]
    Failed {
        status: Option<u16>,
        message: String,
        response_text: Option<String>,
    },
}

impl TransferError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransferError::Failed { status, .. } => *status,
            _ => None,
        }
    }
}

pub type Completion = Result<Response, TransferError>;

/// Issues requests whose completions are delivered back to the caller later.
pub trait Transport {
    fn request(&mut self, options: RequestOptions) -> RequestId;

    /// Cancels a request. Its completion, if any, reports
    /// [`TransferError::Aborted`].
    fn abort(&mut self, id: RequestId);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn request(&mut self, options: RequestOptions) -> RequestId {
        (**self).request(options)
    }

    fn abort(&mut self, id: RequestId) {
        (**self).abort(id)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandwidth_is_bits_per_second() {
        let response = Response::new(200, Bytes::from(vec![0u8; 1000]), Duration::from_secs(2));
        assert_eq!(response.bytes_received, 1000);
        assert_eq!(response.bandwidth, 4000.0);
    }

    #[test]
    fn zero_round_trip_has_no_bandwidth() {
        let response = Response::new(200, Bytes::from_static(b"x"), Duration::ZERO);
        assert_eq!(response.bandwidth, 0.0);
    }
}
