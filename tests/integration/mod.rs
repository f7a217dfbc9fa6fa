//! Integration tests for erp-agent.

pub mod agent_test;
pub mod config_test;
pub mod query_test;
pub mod safety_test;
