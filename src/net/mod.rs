//! Network-layer primitives used by the scanner: port probing, SSH
//! connect/exec/shell, and jump-host tunneling (§4.1, §4.2, §4.3).

pub mod jump_host;
pub mod prober;
pub mod ssh;
