// webpilot: LLM-driven browser automation agent core
// Perception, decision and control for driving a real browser through a
// natural-language task

pub mod action;
pub mod browser;
pub mod config;
pub mod controller;
pub mod error;
pub mod guardrails;
pub mod llm;
pub mod memory;
pub mod perception;
pub mod planner;
pub mod verifier;

// Re-export commonly used types
pub use action::{Action, Decision, ScrollDirection, WaitUntil};
pub use browser::{BoundingBox, BrowserGateway, CdpGateway, ElementHandle, ScrollGeometry};
pub use config::AgentConfig;
pub use controller::{
    ActionOutcome, AgentController, Feedback, LoopOutcome, PauseKind, RegionDiff, RunOptions,
    StepPhase,
};
pub use error::{AgentError, Result};
pub use guardrails::{GuardrailVerdict, Guardrails};
pub use llm::{
    DecisionOracle, HeuristicOracle, LayeredOracle, LlmClient, LlmDecisionOracle,
    SemanticVisibility,
};
pub use memory::{HistoryEntry, HistoryStore, SessionMemory};
pub use perception::{ElementStore, Region, RegionRole, Regionizer};
pub use planner::{Plan, PlanStep, Planner, TaskKind};
pub use verifier::{EffectVerifier, Verifier};
