pub mod loader;
pub mod merge;
pub mod model;
pub mod parser;
pub mod timeline;

pub use loader::{PlaylistEvent, PlaylistLoader, PlaylistState, resolve_manifest};
pub use merge::{MergeOutcome, compute_expired, merge_playlists, update_segments};
pub use model::{
    ByteRange, DtsSpan, Playlist, Segment, SegmentKey, SegmentTimingUpdate, TimingInfo,
};
pub use parser::{M3u8Parser, ParsedManifest, PlaylistParser, VariantInfo};
pub use timeline::{media_index_for_time, playlist_duration};
