use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use toolwire::mcp::transport::TransportConfig;
use toolwire::storage::SqliteSessionStore;

/// Path to the `mcp_test_server` binary built alongside the tests.
#[allow(dead_code)]
pub fn test_server_exe() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mcp_test_server"))
}

/// Stdio transport config that spawns the test server with `args`.
#[allow(dead_code)]
pub fn test_server_config(args: &[&str]) -> TransportConfig {
    TransportConfig::Stdio {
        command: test_server_exe(),
        args: args.iter().map(|a| a.to_string()).collect(),
        env: Default::default(),
        working_dir: None,
    }
}

#[allow(dead_code)]
pub fn create_temp_store() -> (SqliteSessionStore, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let db_path = tmp.path().join("sessions.db");
    let store =
        SqliteSessionStore::new_with_path(db_path).expect("failed to create sqlite session store");
    (store, tmp)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
