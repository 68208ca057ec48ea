//! Proxy handle model
//!
//! A proxy handle is one explicitly computed artifact plus the metadata
//! needed to reason about it: who computed it, when, how long it took and
//! whether it still reflects its source.
//!
//! # Handle States
//!
//! | State | Stored | Data | Description |
//! |-------|--------|------|-------------|
//! | Empty | no | - | No handle exists for the source type |
//! | Computing | yes | no | A computation is in flight |
//! | Fresh | yes | yes | Computed and not known to be outdated |
//! | Stale | yes | yes | Readable, but the source may have changed |
//! | Error | yes | no | Last computation failed; `error` is set |

pub mod ids;
pub mod state;

pub use ids::{HandleId, SourceType};
pub use state::{HandleStatus, ProxyHandle};
