//! erp-agent - natural-language question answering over payroll and HR data.
//!
//! A question runs through an iterative loop: a model proposes SQL, a
//! safety gate screens it, PostgreSQL executes it, and the model judges
//! whether the rows answer the question or another query is needed.

pub mod agent;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod logging;
pub mod safety;
