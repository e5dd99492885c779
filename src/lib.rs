pub mod archive;
pub mod config;
pub mod context;
pub mod errors;
pub mod lattice;
pub mod logging;
pub mod oracle;
pub mod orchestrator;
pub mod paths;
pub mod run_config;
pub mod scheduler;
pub mod stages;
pub mod survey;
pub mod timer;
