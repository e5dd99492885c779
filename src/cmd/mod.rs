//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled   |
//! |-----------|--------------------|
//! | `run`     | `Run`, `Submit`    |
//! | `check`   | `Check`            |
//! | `status`  | `Status`, `Reset`  |
//! | `config`  | `Config`           |

pub mod check;
pub mod config;
pub mod run;
pub mod status;

pub use check::cmd_check;
pub use config::cmd_config;
pub use run::{cmd_run, cmd_submit};
pub use status::{cmd_reset, cmd_status};
