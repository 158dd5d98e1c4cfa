//! # beacon-core
//!
//! Session registry, topic routing and request correlation for the Beacon
//! message broker.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Topic** - Dot-delimited topics and single-segment wildcard patterns
//! - **Router** - Subscription and service tables with uniform local/remote targets
//! - **Correlator** - Pending-call table resolved by response or timeout
//! - **Sessions** - Live sessions and their outbound queues
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  PUB/REQ   ┌─────────────┐   Remote   ┌─────────────┐
//! │  Session    │───────────▶│   Router    │───────────▶│  Sessions   │
//! └─────────────┘            └─────────────┘            └─────────────┘
//!                              │  Local  ▲ RES "self"
//!                              ▼         │
//!                      ┌─────────────┐ ┌─────────────┐
//!                      │  Callbacks  │ │ Correlator  │
//!                      └─────────────┘ └─────────────┘
//! ```

pub mod correlation;
pub mod local;
pub mod router;
pub mod session;
pub mod target;
pub mod topic;

pub use correlation::{CallError, Correlator, Reply, PING_TIMEOUT};
pub use router::{Router, RouterConfig, RouterError, RouterStats};
pub use session::{Outbox, SessionHandle, SessionId, Sessions};
pub use target::{Replier, Route, Target};
pub use topic::{validate_topic, TopicPattern};
