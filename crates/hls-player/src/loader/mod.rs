//! Segment loading: request construction and the fetch/decrypt/append
//! state machine.

mod request;
mod segment_loader;

pub use request::{byterange_header, default_iv, key_request, segment_request};
pub use segment_loader::{LoaderEvent, LoaderState, LoaderStats, PlaybackClock, SegmentLoader};
