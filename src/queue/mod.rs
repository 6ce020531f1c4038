//! Recommendation queue
//!
//! Keeps a swipe client supplied with books that have a cover, have not been
//! shown before and arrive in the order the recommendation source sent them.
//!
//! ## Architecture
//!
//! ```text
//! RecommendationSource ──► filter (shown / queued / batch dups)
//!                               │
//!                               ▼
//!                         PendingPool ──► illustration tasks (CoverResolver + ImageFetcher)
//!                               │                    │
//!                               ◄────── settle ──────┘
//!                               │
//!                               ▼ (arrival order)
//!                          ReadyQueue ──► current() / decide()
//! ```

pub mod engine;
pub mod events;
pub mod item;
pub mod metrics;
pub mod pending;
pub mod ports;
pub mod ready;

pub use engine::{Collaborators, QueueEngine, RefillSummary};
pub use events::{QueueEvent, QueueSnapshot, QueueStatus, RefillRequest};
pub use item::{Book, CoverImage, Decision, DecisionTag, IllustratedBook};
pub use metrics::{EngineStats, StatsSnapshot};
pub use ports::{
    CoverResolver, DecisionSink, FavoritesStore, ImageFetcher, RecommendationSource, ShownHistory,
};
