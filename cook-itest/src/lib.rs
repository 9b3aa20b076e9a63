//! Scenario runner for Cook scheduler integration tests.

pub mod context;
pub mod scenarios;

pub use context::{ScenarioContext, ScenarioError, ScenarioResult, ensure};
pub use scenarios::{SCENARIOS, ScenarioOutcome, ScenarioReport, run_scenario, run_scenarios};
