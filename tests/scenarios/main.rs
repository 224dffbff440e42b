//! Scenario tests - end-to-end pipeline runs against a mock provider

#[path = "../helpers.rs"]
mod helpers;

mod cost_tracking;
mod dry_run;
mod failure_handling;
mod retry_behavior;
mod success_chain;
mod variable_substitution;
