//! Autonomous agent core.
//!
//! The controller drives a request through an explicit state machine:
//! plan, select or design a capability, execute sandboxed, verify,
//! then respond or learn and retry within a bounded budget.

pub mod controller;
pub mod planner;
pub mod reflection;
pub mod state;

pub use controller::{AgentController, Request, Response, ResponseMetadata};
pub use planner::{Plan, Planner, DEFAULT_BREADTH, ESCALATION_THRESHOLD};
pub use reflection::{ReflexionEpisode, ReflexionMemory};
pub use state::{AgentState, Context, ContextManager, FeedbackEntry, StateKind, StateTransition};
