//! Core domain models.

pub mod mission;

pub use mission::{
    ConditionKind, ConditionSpec, Mission, MissionKind, MissionStatus, SwapPayload, SwapSide,
    TargetProvenance, WorkerId,
};
