//! # Scale-out Core - Gateway/Shard Session Routing
//!
//! The routing core of a horizontally scaled game tier. Stateless gateways
//! authenticate client handshakes and hand each session to a shard; shards
//! own the session lifecycle and run on an externally driven tick. The two
//! never talk directly: every fact they share goes through a
//! [`GatewayShardBackplane`].
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Backplane** - Shard heartbeats, session ownership, request/response
//!   queues and termination records, each keyed by a single id
//! * **Gateway** - [`GatewaySessionManager`] decides `open_session`,
//!   `reconnect` and in-session routing from backplane state alone
//! * **Shard** - [`GameSessionShard`] drains requests, runs the
//!   `WAITING -> PLAYING -> TERMINATED` state machine and completes
//!   sessions whose tick budget is spent
//! * **Telemetry** - Prometheus counters and a jitter histogram plus
//!   `tracing` spans correlated by the caller's trace id
//!
//! ### Message Flow
//!
//! 1. A client handshake reaches a gateway, which checks the token
//! 2. The gateway maps the session to an active shard and enqueues
//!    `SESSION_CONNECTED` on that shard's request queue
//! 3. On its next tick the shard drains the queue and answers with
//!    `SESSION_ACK` on the session's response queue
//! 4. The transport layer drains responses and delivers them to the client
//!
//! ## Terminal Outcomes
//!
//! Authentication failures, unavailable shards, normal completion and
//! policy termination are all recorded as a [`TerminationContext`] and
//! returned as values. Once recorded, a session id is closed for good:
//! every later call returns the same record.
//!
//! ## Time
//!
//! Every component reads time through [`Clock`]. Tests drive
//! [`ManualClock`] forward instead of sleeping.

pub use auth::{StaticTokenValidator, TokenValidator};
pub use backplane::{BackplaneError, BackplaneResult, GatewayShardBackplane, InMemoryBackplane};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, RoutingConfig};
pub use envelope::{EnvelopeError, MessageEnvelope, MessageType};
pub use error::{RoutingError, RoutingResult};
pub use gateway::{GatewaySessionManager, GatewaySessionResult};
pub use shard::{GameSessionShard, SessionPhase, SessionState, TickReport};
pub use telemetry::{RoutingMetrics, SpanKind, Telemetry, TraceSupport};
pub use termination::{TerminationContext, TerminationError, TerminationReason};

pub mod auth;
pub mod backplane;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod shard;
pub mod telemetry;
pub mod termination;
