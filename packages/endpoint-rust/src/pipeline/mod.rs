//! Behavior pipeline: typed stage contexts, behaviors with an explicit
//! continuation cursor, and dependency-ordered step registration.
//!
//! Incoming messages flow through
//! `IncomingPhysicalContext` → `IncomingLogicalContext` → `InvokeHandlerContext`;
//! outgoing messages through `OutgoingLogicalContext` → `OutgoingPhysicalContext`.
//! Each stage ends in a [`Terminal`]; connector terminals derive the next
//! stage's context and run that stage.

pub mod behavior;
pub mod context;
pub mod step;

pub use behavior::{Behavior, Next, Stage, Terminal};
pub use context::{
    Extensions, IncomingLogicalContext, IncomingMessageInfo, IncomingPhysicalContext,
    InvokeHandlerContext, OutgoingIntent, OutgoingLogicalContext, OutgoingPhysicalContext,
};
pub use step::{PipelineSettings, ResolvedSteps, StepRegistration, StepReplacement};
