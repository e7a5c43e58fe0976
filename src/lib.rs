// PERFHARVEST -- HARDWARE-COUNTER DATASET HARNESS
// LIBRARY CRATE: EVERYTHING THE BINARY AND THE INTEGRATION TESTS SHARE

pub mod capture;
pub mod config;
pub mod dataset;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod planner;
pub mod scheduler;
