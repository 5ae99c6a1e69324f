pub mod analyzer;
pub mod cli;
pub mod config;
pub mod correlator;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod normalizer;
pub mod orchestrator;
pub mod report;
pub mod scanner;
pub mod service;
pub mod usage;
