// Request construction for keys and segments.

use std::time::Duration;

use reqwest::header::{HeaderValue, RANGE};
use tracing::warn;

use crate::playlist::{ByteRange, Segment, SegmentKey};
use crate::transport::{RequestOptions, ResponseType};

/// `Range` header value for a byte-range segment: `bytes=<first>-<last>`,
/// both inclusive.
pub fn byterange_header(range: &ByteRange) -> String {
    format!("bytes={}-{}", range.offset, range.last_byte())
}

/// IV used when a key tag carries none: the segment's media sequence number
/// in the low 32 bits, big-endian.
///
/// Sequence numbers above `u32::MAX` wrap.
pub fn default_iv(media_sequence_number: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[12..].copy_from_slice(&(media_sequence_number as u32).to_be_bytes());
    iv
}

pub fn segment_request(
    segment: &Segment,
    with_credentials: bool,
    timeout: Option<Duration>,
) -> RequestOptions {
    let mut options = RequestOptions::get(segment.request_uri(), ResponseType::Bytes)
        .with_credentials(with_credentials)
        .with_timeout(timeout);
    if let Some(range) = &segment.byte_range {
        let value = byterange_header(range);
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                options.headers.insert(RANGE, value);
            }
            Err(e) => warn!(range = %value, error = %e, "Invalid range header"),
        }
    }
    options
}

pub fn key_request(
    key: &SegmentKey,
    with_credentials: bool,
    timeout: Option<Duration>,
) -> RequestOptions {
    RequestOptions::get(key.request_uri(), ResponseType::Bytes)
        .with_credentials(with_credentials)
        .with_timeout(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byterange_is_inclusive() {
        let range = ByteRange {
            offset: 1823412,
            length: 476580,
        };
        assert_eq!(byterange_header(&range), "bytes=1823412-2299991");

        let first_byte = ByteRange {
            offset: 0,
            length: 1,
        };
        assert_eq!(byterange_header(&first_byte), "bytes=0-0");
    }

    #[test]
    fn segment_request_carries_range() {
        let mut segment = Segment::new("main.ts", 10.0);
        segment.resolved_uri = Some("http://example.com/main.ts".into());
        segment.byte_range = Some(ByteRange {
            offset: 1823412,
            length: 476580,
        });

        let options = segment_request(&segment, true, None);
        assert_eq!(options.uri, "http://example.com/main.ts");
        assert_eq!(options.response_type, ResponseType::Bytes);
        assert!(options.with_credentials);
        assert_eq!(options.headers.get(RANGE).unwrap(), "bytes=1823412-2299991");

        let plain = segment_request(&Segment::new("a.ts", 10.0), false, None);
        assert!(plain.headers.get(RANGE).is_none());
    }

    #[test]
    fn default_iv_folds_to_32_bits() {
        let iv = default_iv(5);
        assert_eq!(iv, [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 5]);

        let wrapped = default_iv(u32::MAX as u64 + 2);
        assert_eq!(&wrapped[12..], &[0, 0, 0, 1]);
    }
}
