pub mod manifest_cmd;
pub mod run_cmd;
pub mod status;
