//! Handlekeep - explicit, lifecycle-tracked proxy handles
//!
//! A [`HandleStore`] holds one [`ProxyHandle`] per source type. Handles are
//! only created or refreshed by an explicit [`HandleStore::compute`] call;
//! reads never trigger work. Concurrent computes for one source type share a
//! single execution, lifecycle changes are published on an [`EventBus`],
//! and an [`InvalidationReactor`] marks handles stale when change events
//! arrive on a [`ChangeTransport`].
//!
//! ```rust,ignore
//! use handlekeep::{ComputeOptions, HandleStore};
//!
//! let store = HandleStore::new();
//! let handle = store
//!     .compute("widgets", || async { Ok::<_, String>(vec![1, 2, 3]) }, ComputeOptions::new("loader"))
//!     .await?;
//! assert!(handle.is_fresh());
//! store.invalidate("widgets");
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod handle;
pub mod reactor;
pub mod store;
pub mod topology;
pub mod ui;

pub use error::{HandleError, HandleResult};
pub use events::{EventBus, EventListener, EventType, LifecycleEvent, Subscription};
pub use handle::{HandleId, HandleStatus, ProxyHandle, SourceType};
pub use reactor::{ChangeEvent, ChangeTransport, InvalidationReactor, InvalidationTrigger};
pub use store::{ComputeOptions, HandleStore, Invalidator};
