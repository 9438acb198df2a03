#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    /// Project with a quiet config and a state file under `.infraflow/`
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let project = Self { root };
        project.write_config("logging:\n  level: warn\n");
        project
    }

    pub fn write_config(&self, content: &str) {
        fs::write(self.root.path().join("infraflow.yaml"), content).unwrap();
    }

    pub fn write_json(&self, name: &str, value: &serde_json::Value) -> PathBuf {
        let path = self.root.path().join(name);
        fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
        path
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.path().join(".infraflow").join("state.json")
    }

    /// `infraflow` running inside the project with a clean environment
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("infraflow").unwrap();
        cmd.current_dir(self.root.path())
            .env_remove("INFRAFLOW_CONFIG_PATH")
            .env_remove("INFRAFLOW_STATE_FILE")
            .env_remove("INFRAFLOW_LOG_LEVEL")
            .env_remove("INFRAFLOW_REGION")
            .env_remove("AWS_REGION")
            .env_remove("RUST_LOG")
            .env("XDG_CONFIG_HOME", self.root.path().join("xdg"))
            .env("NO_COLOR", "1");
        cmd
    }

    /// Run `args` and require success
    pub fn run(&self, args: &[&str]) {
        self.cmd().args(args).assert().success();
    }

    pub fn state(&self) -> serde_json::Value {
        let content = fs::read_to_string(self.state_path()).unwrap();
        serde_json::from_str(&content).unwrap()
    }
}
