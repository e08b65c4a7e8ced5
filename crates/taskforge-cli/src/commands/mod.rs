pub mod cancel;
pub mod complete;
pub mod fail;
pub mod next;
pub mod plan;
pub mod prune;
pub mod run_cmd;
pub mod status;
pub mod submit;
