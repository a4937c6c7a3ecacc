//! Test helpers: build the agent router over temporary directories.
//!
//! Run from workspace root: `cargo test -p secstore-agent`.
//! External processes are replaced by [`FakeRunner`]; uploads land on a
//! `Local` store so nothing needs mounting.
#![allow(dead_code)]

pub mod uploads;

use async_trait::async_trait;
use axum_test::TestServer;
use secstore_agent::setup::{routes, services};
use secstore_agent::state::AppState;
use secstore_core::{AgentConfig, Config, StoreDescriptor};
use secstore_infra::{CommandOutput, CommandRunner, ProcessError};
use secstore_storage::DefaultStorageProvider;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const TEST_UPLOAD_KEY: &[u8] = b"test-upload-key-0123456789";
pub const FORWARDED_HOST: &str = "ssvm.example.test";

/// Records every external invocation and fails it.
#[derive(Default)]
pub struct FakeRunner {
    pub calls: Mutex<Vec<(String, Vec<String>)>>,
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        _timeout: Duration,
    ) -> Result<CommandOutput, ProcessError> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));
        Ok(CommandOutput {
            status: Some(1),
            stdout: String::new(),
            stderr: "external processes are disabled in tests".to_string(),
        })
    }
}

/// Test application: server plus the temp directories it writes to.
pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub runner: Arc<FakeRunner>,
    pub _temp_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    fn root(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Root of the local store uploads land on.
    pub fn store_root(&self) -> PathBuf {
        self.root().join("store")
    }

    pub fn store(&self) -> StoreDescriptor {
        StoreDescriptor::Local {
            path: self.store_root(),
        }
    }

    pub fn userdata_dir(&self) -> PathBuf {
        self.root().join("userdata")
    }
}

pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(|_| {}).await
}

/// Like [`setup_test_app`], with a hook to adjust configuration first.
pub async fn setup_test_app_with(configure: impl FnOnce(&mut AgentConfig)) -> TestApp {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let root = temp_dir.path();

    let mount_table = root.join("mounts");
    std::fs::write(&mount_table, "").expect("Failed to create mount table");

    let mut agent = AgentConfig::default();
    agent.mount_root = root.join("mnt");
    agent.mount_table_path = mount_table;
    agent.public_download_dir = root.join("userdata");
    agent.public_download_base_url = "http://localhost:8210/userdata".to_string();
    agent.upload_public_base_url = "https://ssvm.example.test".to_string();
    agent.worker_pool_size = 2;
    configure(&mut agent);
    let config = Config::new(agent);

    let runner = Arc::new(FakeRunner::default());
    let state = services::build_state(
        &config,
        runner.clone(),
        Arc::new(DefaultStorageProvider),
        TEST_UPLOAD_KEY,
    )
    .expect("Failed to build state");

    let app = routes::setup_routes(state.clone());
    let server = TestServer::new(app.into_make_service()).expect("Failed to create test server");

    TestApp {
        server,
        state,
        runner,
        _temp_dir: temp_dir,
    }
}
