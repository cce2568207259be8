use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bollard::exec::CreateExecOptions;
use bollard::image::BuildImageOptions;
use devcontainer_runner::{
    config::{load_config, parse_config, DevContainerConfig},
    container::ContainerManager,
    core::{
        CommandExecutor, ContainerRuntime, CreateRequest, Hook, ImageRuntime, OutputFrame, OutputStream, RunContext,
        RunnerError, TIMEOUT_EXIT_CODE,
    },
    docker::{ImageManager, NoCredentials},
    monitoring::{LogSink, MemorySink},
    runner::Runner,
};
use futures::{stream, StreamExt};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Ordered log of every call the doubles receive.
#[derive(Default)]
struct Calls(Mutex<Vec<String>>);

impl Calls {
    fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn hooks(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|c| c.starts_with("host:") || c.starts_with("exec:"))
            .collect()
    }
}

#[derive(Default)]
struct FakeImages {
    calls: Arc<Calls>,
    exists: bool,
    exists_error: Option<String>,
    pull_error: Option<String>,
    build_error: Option<String>,
    builds: Mutex<Vec<(BuildImageOptions<String>, Vec<u8>)>>,
}

#[async_trait]
impl ImageRuntime for FakeImages {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        self.calls.push(format!("image_exists:{image}"));
        match &self.exists_error {
            Some(err) => Err(anyhow!(err.clone())),
            None => Ok(self.exists),
        }
    }

    async fn pull_image(&self, image: &str, _registry_auth: Option<String>, log: &dyn LogSink) -> Result<()> {
        self.calls.push(format!("pull:{image}"));
        log.write(b"Pulling from library\n");
        match &self.pull_error {
            Some(err) => Err(anyhow!(err.clone())),
            None => Ok(()),
        }
    }

    async fn build_image(&self, options: BuildImageOptions<String>, context: Vec<u8>, _log: &dyn LogSink) -> Result<()> {
        self.calls.push("build");
        self.builds.lock().unwrap().push((options, context));
        match &self.build_error {
            Some(err) => Err(anyhow!(err.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct FakeContainers {
    calls: Arc<Calls>,
    /// Exit code per joined argv; anything else exits 0.
    exit_codes: HashMap<String, i64>,
    /// Joined argv whose output never ends.
    hang: Option<String>,
    create_error: Option<String>,
    start_error: Option<String>,
    fail_stop: Option<String>,
    execs: Mutex<HashMap<String, String>>,
    created: Mutex<Vec<CreateRequest>>,
}

#[async_trait]
impl ContainerRuntime for FakeContainers {
    async fn create_container(&self, request: CreateRequest) -> Result<String> {
        self.calls
            .push(format!("create:{}", request.config.image.clone().unwrap_or_default()));
        self.created.lock().unwrap().push(request);
        match &self.create_error {
            Some(err) => Err(anyhow!(err.clone())),
            None => Ok("container-id".to_string()),
        }
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.calls.push(format!("start:{container_id}"));
        match &self.start_error {
            Some(err) => Err(anyhow!(err.clone())),
            None => Ok(()),
        }
    }

    async fn stop_container(&self, container_id: &str) -> Result<()> {
        self.calls.push(format!("stop:{container_id}"));
        if self.fail_stop.as_deref() == Some(container_id) {
            return Err(anyhow!("container is wedged"));
        }
        Ok(())
    }

    async fn create_exec(&self, _container_id: &str, options: CreateExecOptions<String>) -> Result<String> {
        let command = options.cmd.unwrap_or_default().join(" ");
        self.calls.push(format!("exec:{command}"));
        let mut execs = self.execs.lock().unwrap();
        let id = format!("exec-{}", execs.len());
        execs.insert(id.clone(), command);
        Ok(id)
    }

    async fn attach_exec(&self, exec_id: &str) -> Result<OutputStream> {
        let command = self.execs.lock().unwrap()[exec_id].clone();
        let output = stream::iter(vec![Ok(OutputFrame::Stdout(format!("ran {command}\n").into_bytes()))]);
        if self.hang.as_deref() == Some(command.as_str()) {
            Ok(output.chain(stream::pending()).boxed())
        } else {
            Ok(output.boxed())
        }
    }

    async fn start_exec_detached(&self, _exec_id: &str) -> Result<()> {
        Ok(())
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<Option<i64>> {
        let command = self.execs.lock().unwrap()[exec_id].clone();
        Ok(Some(self.exit_codes.get(&command).copied().unwrap_or(0)))
    }

    async fn copy_to_container(&self, _container_id: &str, _path: &str, _archive: Vec<u8>) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct FakeHost {
    calls: Arc<Calls>,
    fail: Option<String>,
}

#[async_trait]
impl CommandExecutor for FakeHost {
    async fn run(&self, command: &[String], _dir: &Path, stdout: &dyn LogSink, _stderr: &dyn LogSink) -> Result<()> {
        let command = command.join(" ");
        self.calls.push(format!("host:{command}"));
        stdout.write(format!("host ran {command}\n").as_bytes());
        if self.fail.as_deref() == Some(command.as_str()) {
            return Err(anyhow!("exit status: 2"));
        }
        Ok(())
    }
}

struct Harness {
    calls: Arc<Calls>,
    images: Arc<FakeImages>,
    containers: Arc<FakeContainers>,
    log: MemorySink,
    runner: Runner,
}

impl Harness {
    fn new(images: FakeImages, containers: FakeContainers, host: FakeHost) -> Self {
        let calls = Arc::new(Calls::default());
        let images = Arc::new(FakeImages {
            calls: calls.clone(),
            ..images
        });
        let containers = Arc::new(FakeContainers {
            calls: calls.clone(),
            ..containers
        });
        let host = Arc::new(FakeHost {
            calls: calls.clone(),
            ..host
        });
        let log = MemorySink::new();

        let runner = Runner::new(
            ImageManager::new(images.clone(), Arc::new(NoCredentials), Arc::new(log.clone())),
            ContainerManager::new(containers.clone()),
            host,
        )
        .with_log(Arc::new(log.clone()));

        Self {
            calls,
            images,
            containers,
            log,
            runner,
        }
    }

    fn with_local_image() -> Self {
        Self::new(
            FakeImages {
                exists: true,
                ..Default::default()
            },
            FakeContainers::default(),
            FakeHost::default(),
        )
    }
}

fn manifest(json: &str) -> DevContainerConfig {
    parse_config(json.as_bytes()).unwrap()
}

fn archived_file(archive: &[u8], name: &str) -> Option<String> {
    let mut reader = tar::Archive::new(archive);
    for entry in reader.entries().unwrap() {
        let mut entry = entry.unwrap();
        if entry.path().unwrap().to_string_lossy() == name {
            let mut contents = String::new();
            entry.read_to_string(&mut contents).unwrap();
            return Some(contents);
        }
    }
    None
}

#[tokio::test]
async fn local_image_is_not_pulled() {
    let harness = Harness::with_local_image();
    let config = manifest(r#"{ "image": "test-image" }"#);

    let id = harness
        .runner
        .run(&RunContext::new(), Path::new("/projects/demo"), &config)
        .await
        .unwrap();

    assert_eq!(id, "container-id");
    assert_eq!(
        harness.calls.all(),
        vec![
            "image_exists:test-image".to_string(),
            "create:test-image".to_string(),
            "start:container-id".to_string(),
        ]
    );
}

#[tokio::test]
async fn missing_image_is_pulled_before_create() {
    let harness = Harness::new(FakeImages::default(), FakeContainers::default(), FakeHost::default());
    let config = manifest(r#"{ "image": "test-image" }"#);

    harness
        .runner
        .run(&RunContext::new(), Path::new("/projects/demo"), &config)
        .await
        .unwrap();

    let calls = harness.calls.all();
    assert_eq!(&calls[..3], &["image_exists:test-image", "pull:test-image", "create:test-image"]);
    assert!(harness.log.contents().contains("Pulling from library"));
}

#[tokio::test]
async fn pull_failure_names_the_image() {
    let harness = Harness::new(
        FakeImages {
            pull_error: Some("manifest unknown".to_string()),
            ..Default::default()
        },
        FakeContainers::default(),
        FakeHost::default(),
    );
    let config = manifest(r#"{ "image": "test-image" }"#);

    let err = harness
        .runner
        .run(&RunContext::new(), Path::new("/projects/demo"), &config)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Failed to pull image test-image: manifest unknown");
    assert!(!harness.calls.all().iter().any(|c| c.starts_with("create")));
}

#[tokio::test]
async fn dockerfile_build_failure_is_reported() {
    let project = TempDir::new().unwrap();
    std::fs::write(project.path().join("Dockerfile"), "FROM ubuntu\n").unwrap();

    let harness = Harness::new(
        FakeImages {
            build_error: Some("build error".to_string()),
            ..Default::default()
        },
        FakeContainers::default(),
        FakeHost::default(),
    );
    let config = manifest(r#"{ "dockerfile": "Dockerfile" }"#);

    let err = harness
        .runner
        .run(&RunContext::new(), project.path(), &config)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Failed to build image: build error"), "{err}");
    assert_eq!(harness.calls.all(), vec!["build".to_string()]);
}

#[tokio::test]
async fn built_image_tag_is_used_for_the_container() {
    let project = TempDir::new().unwrap();
    let devcontainer = project.path().join(".devcontainer");
    std::fs::create_dir_all(&devcontainer).unwrap();
    std::fs::write(
        devcontainer.join("Dockerfile"),
        "FROM rust:1 AS dev\nRUN cargo install cargo-watch\nFROM dev AS release\nRUN cargo build --release\n",
    )
    .unwrap();
    std::fs::write(
        devcontainer.join("devcontainer.json"),
        r#"{
            // built from the repository root
            "name": "Rust Dev",
            "build": {
                "dockerfile": "Dockerfile",
                "context": "..",
                "args": { "VARIANT": "bookworm" },
                "target": "dev",
            },
        }"#,
    )
    .unwrap();

    let harness = Harness::new(FakeImages::default(), FakeContainers::default(), FakeHost::default());
    let config = load_config(project.path()).await.unwrap();
    harness
        .runner
        .run(&RunContext::new(), project.path(), &config)
        .await
        .unwrap();

    let builds = harness.images.builds.lock().unwrap();
    let (options, context) = &builds[0];
    assert_eq!(options.buildargs["VARIANT"], "bookworm");
    assert!(options.t.starts_with("rust-dev-"));

    // The build stops at the `dev` stage.
    let staged = archived_file(context, &options.dockerfile).unwrap();
    assert_eq!(staged, "FROM rust:1 AS dev\nRUN cargo install cargo-watch\n");
    assert!(archived_file(context, ".devcontainer/Dockerfile").unwrap().contains("release"));

    let created = harness.containers.created.lock().unwrap();
    assert_eq!(created[0].config.image.as_deref(), Some(options.t.as_str()));
}

#[tokio::test]
async fn build_without_target_uses_the_dockerfile_directly() {
    let project = TempDir::new().unwrap();
    std::fs::write(project.path().join("Dockerfile"), "FROM ubuntu\n").unwrap();

    let harness = Harness::new(FakeImages::default(), FakeContainers::default(), FakeHost::default());
    let config = manifest(r#"{ "build": { "dockerfile": "Dockerfile" } }"#);
    harness
        .runner
        .run(&RunContext::new(), project.path(), &config)
        .await
        .unwrap();

    let builds = harness.images.builds.lock().unwrap();
    assert_eq!(builds[0].0.dockerfile, "Dockerfile");
    assert!(archived_file(&builds[0].1, "Dockerfile").is_some());
}

#[tokio::test]
async fn unknown_build_target_fails_before_building() {
    let project = TempDir::new().unwrap();
    std::fs::write(project.path().join("Dockerfile"), "FROM ubuntu AS base\n").unwrap();

    let harness = Harness::new(FakeImages::default(), FakeContainers::default(), FakeHost::default());
    let config = manifest(r#"{ "build": { "dockerfile": "Dockerfile", "target": "dev" } }"#);
    let err = harness
        .runner
        .run(&RunContext::new(), project.path(), &config)
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Failed to build image: target stage \"dev\" not found in Dockerfile"
    );
    assert!(harness.calls.all().is_empty());
}

#[tokio::test]
async fn missing_dockerfile_is_reported() {
    let project = TempDir::new().unwrap();
    let harness = Harness::new(FakeImages::default(), FakeContainers::default(), FakeHost::default());
    let config = manifest(r#"{ "dockerfile": "Missing.Dockerfile" }"#);

    let err = harness
        .runner
        .run(&RunContext::new(), project.path(), &config)
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::DockerfileNotFound));
    assert_eq!(err.to_string(), "Dockerfile not found");
    assert!(harness.calls.all().is_empty());
}

#[tokio::test]
async fn dockerfile_and_build_together_are_invalid() {
    let harness = Harness::with_local_image();
    let config = manifest(r#"{ "dockerfile": "Dockerfile", "build": { "dockerfile": "Other.Dockerfile" } }"#);

    let err = harness
        .runner
        .run(&RunContext::new(), Path::new("/projects/demo"), &config)
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::InvalidConfig));
    assert!(harness.calls.all().is_empty());
}

#[tokio::test]
async fn image_check_failure_names_the_image() {
    let harness = Harness::new(
        FakeImages {
            exists_error: Some("daemon unavailable".to_string()),
            ..Default::default()
        },
        FakeContainers::default(),
        FakeHost::default(),
    );
    let config = manifest(r#"{ "image": "test-image" }"#);

    let err = harness
        .runner
        .run(&RunContext::new(), Path::new("/projects/demo"), &config)
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Failed to check if image test-image exists: daemon unavailable"
    );
    assert_eq!(harness.calls.all(), vec!["image_exists:test-image".to_string()]);
}

#[tokio::test]
async fn create_failure_stops_before_start() {
    let harness = Harness::new(
        FakeImages {
            exists: true,
            ..Default::default()
        },
        FakeContainers {
            create_error: Some("no space left on device".to_string()),
            ..Default::default()
        },
        FakeHost::default(),
    );
    let config = manifest(r#"{ "image": "test-image", "initializeCommand": "never" }"#);

    let err = harness
        .runner
        .run(&RunContext::new(), Path::new("/projects/demo"), &config)
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::ContainerCreate(_)));
    assert_eq!(err.to_string(), "Failed to create container: no space left on device");
    assert_eq!(
        harness.calls.all(),
        vec!["image_exists:test-image".to_string(), "create:test-image".to_string()]
    );
}

#[tokio::test]
async fn start_failure_runs_no_hooks_and_no_rollback() {
    let harness = Harness::new(
        FakeImages {
            exists: true,
            ..Default::default()
        },
        FakeContainers {
            start_error: Some("port is already allocated".to_string()),
            ..Default::default()
        },
        FakeHost::default(),
    );
    let config = manifest(
        r#"{
            "image": "test-image",
            "initializeCommand": "never",
            "onCreateCommand": "never"
        }"#,
    );

    let err = harness
        .runner
        .run(&RunContext::new(), Path::new("/projects/demo"), &config)
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::ContainerStart(_)));
    assert_eq!(err.to_string(), "Failed to start container: port is already allocated");
    assert_eq!(
        harness.calls.all(),
        vec![
            "image_exists:test-image".to_string(),
            "create:test-image".to_string(),
            "start:container-id".to_string(),
        ]
    );
}

#[tokio::test]
async fn cluster_and_readonly_mounts_reach_the_runtime() {
    let harness = Harness::with_local_image();
    let config = manifest(
        r#"{
            "image": "test-image",
            "mounts": [
                "type=cluster,source=shared,target=/shared",
                "type=bind,source=/etc/certs,target=/certs,readonly"
            ]
        }"#,
    );

    harness
        .runner
        .run(&RunContext::new(), Path::new("/projects/demo"), &config)
        .await
        .unwrap();

    let created = harness.containers.created.lock().unwrap();
    assert_eq!(created[0].cluster_mounts, vec![1]);
    let body = created[0].to_json().unwrap();
    let mounts = &body["HostConfig"]["Mounts"];
    assert_eq!(mounts[1]["Type"], "cluster");
    assert_eq!(mounts[2]["Type"], "bind");
    assert_eq!(mounts[2]["ReadOnly"], true);
}

#[tokio::test]
async fn pull_or_build_prefers_the_image() {
    let harness = Harness::new(FakeImages::default(), FakeContainers::default(), FakeHost::default());
    let images = ImageManager::new(harness.images.clone(), Arc::new(NoCredentials), Arc::new(harness.log.clone()));

    let image = images
        .pull_or_build_image(Path::new("/projects/demo"), &manifest(r#"{ "image": "ubuntu:22.04" }"#))
        .await
        .unwrap();
    assert_eq!(image, "ubuntu:22.04");
    assert_eq!(harness.calls.all(), vec!["pull:ubuntu:22.04".to_string()]);

    let err = images
        .pull_or_build_image(Path::new("/projects/demo"), &manifest("{}"))
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::DockerfileNotFound));
}

#[tokio::test]
async fn compose_is_rejected_before_any_runtime_call() {
    let harness = Harness::with_local_image();
    let config = manifest(r#"{ "dockerComposeFile": ["docker-compose.yml"], "service": "x" }"#);

    let err = harness
        .runner
        .run(&RunContext::new(), Path::new("/projects/demo"), &config)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Docker Compose is not supported yet"));
    assert!(harness.calls.all().is_empty());
}

#[tokio::test]
async fn config_without_image_source_is_invalid() {
    let harness = Harness::with_local_image();

    let err = harness
        .runner
        .run(&RunContext::new(), Path::new("/projects/demo"), &manifest("{}"))
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::InvalidConfig));
    assert_eq!(err.to_string(), "Invalid devcontainer configuration");
    assert!(harness.calls.all().is_empty());
}

#[tokio::test]
async fn failing_container_hook_names_command_and_container() {
    let harness = Harness::new(
        FakeImages {
            exists: true,
            ..Default::default()
        },
        FakeContainers {
            exit_codes: HashMap::from([("test command".to_string(), 1)]),
            ..Default::default()
        },
        FakeHost::default(),
    );
    let config = manifest(
        r#"{
            "image": "test-image",
            "onCreateCommand": { "test": ["test", "command"] },
            "postCreateCommand": "never"
        }"#,
    );

    let err = harness
        .runner
        .run(&RunContext::new(), Path::new("/projects/demo"), &config)
        .await
        .unwrap_err();

    assert!(
        err.to_string()
            .contains("Failed to run command test [test command] in container container-id"),
        "{err}"
    );
    assert!(matches!(
        err,
        RunnerError::HookExit {
            hook: Hook::OnCreate,
            exit_code: 1,
            ..
        }
    ));
    assert_eq!(harness.calls.hooks(), vec!["exec:test command".to_string()]);
    assert!(!harness.calls.all().iter().any(|c| c.starts_with("stop")));
}

#[tokio::test]
async fn hooks_run_in_lifecycle_order() {
    let harness = Harness::with_local_image();
    let config = manifest(
        r#"{
            "image": "test-image",
            "postAttachCommand": ["postAttach"],
            "postStartCommand": ["postStart"],
            "postCreateCommand": ["postCreate"],
            "updateContentCommand": ["updateContent"],
            "onCreateCommand": { "b": ["onCreate-b"], "a": ["onCreate-a"] },
            "initializeCommand": ["initialize"]
        }"#,
    );

    harness
        .runner
        .run(&RunContext::new(), Path::new("/projects/demo"), &config)
        .await
        .unwrap();

    assert_eq!(
        harness.calls.hooks(),
        vec![
            "host:initialize",
            "exec:onCreate-a",
            "exec:onCreate-b",
            "exec:updateContent",
            "exec:postCreate",
            "host:postStart",
            "host:postAttach",
        ]
    );
    let log = harness.log.contents();
    assert!(log.contains("ran onCreate-a"));
    assert!(log.contains("host ran postAttach"));
}

#[tokio::test]
async fn failing_host_hook_stops_the_workflow() {
    let harness = Harness::new(
        FakeImages {
            exists: true,
            ..Default::default()
        },
        FakeContainers::default(),
        FakeHost {
            fail: Some("/bin/sh -c ./prepare.sh".to_string()),
            ..Default::default()
        },
    );
    let config = manifest(
        r#"{
            "image": "test-image",
            "initializeCommand": "./prepare.sh",
            "onCreateCommand": "echo never"
        }"#,
    );

    let err = harness
        .runner
        .run(&RunContext::new(), Path::new("/projects/demo"), &config)
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::HostHook { hook: Hook::Initialize, .. }));
    assert!(err.to_string().contains("container-id"));
    assert!(err.to_string().contains("initializeCommand"));
    assert_eq!(harness.calls.hooks(), vec!["host:/bin/sh -c ./prepare.sh".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn hook_timeout_fails_with_exit_124() {
    let harness = Harness::new(
        FakeImages {
            exists: true,
            ..Default::default()
        },
        FakeContainers {
            hang: Some("sleep infinity".to_string()),
            ..Default::default()
        },
        FakeHost::default(),
    );
    let runner = harness.runner.with_hook_timeout(Some(Duration::from_secs(5)));
    let config = manifest(
        r#"{
            "image": "test-image",
            "postCreateCommand": ["sleep", "infinity"],
            "postStartCommand": ["never"]
        }"#,
    );

    let err = runner
        .run(&RunContext::new(), Path::new("/projects/demo"), &config)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunnerError::HookExit {
            hook: Hook::PostCreate,
            exit_code: TIMEOUT_EXIT_CODE,
            ..
        }
    ));
    assert!(!harness.calls.hooks().contains(&"host:never".to_string()));
}

#[tokio::test(start_paused = true)]
async fn cancel_during_hook_is_a_hard_failure() {
    let harness = Harness::new(
        FakeImages {
            exists: true,
            ..Default::default()
        },
        FakeContainers {
            hang: Some("sleep infinity".to_string()),
            ..Default::default()
        },
        FakeHost::default(),
    );
    let config = manifest(r#"{ "image": "test-image", "onCreateCommand": ["sleep", "infinity"] }"#);

    let ctx = RunContext::new();
    let canceler = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceler.cancel();
    });

    let err = harness
        .runner
        .run(&ctx, Path::new("/projects/demo"), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::Canceled));
}

#[tokio::test]
async fn exec_returns_output_and_exit_code() {
    let harness = Harness::new(
        FakeImages::default(),
        FakeContainers {
            exit_codes: HashMap::from([("false".to_string(), 1)]),
            ..Default::default()
        },
        FakeHost::default(),
    );

    let result = harness
        .runner
        .containers()
        .exec(&RunContext::new(), "container-id", &["false".to_string()])
        .await
        .unwrap();

    assert_eq!(result.stdout, "ran false\n");
    assert_eq!(result.exit_code, 1);
}

#[tokio::test]
async fn stop_all_attempts_every_container() {
    let harness = Harness::new(
        FakeImages::default(),
        FakeContainers {
            fail_stop: Some("bad".to_string()),
            ..Default::default()
        },
        FakeHost::default(),
    );
    let ids = ["one", "bad", "two"].map(String::from);

    let failures = harness.runner.stop_all(&RunContext::new(), &ids).await;

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "bad");
    assert_eq!(
        failures[0].1.to_string(),
        "Failed to stop container bad: container is wedged"
    );
    let mut stopped = harness.calls.all();
    stopped.sort();
    assert_eq!(stopped, vec!["stop:bad", "stop:one", "stop:two"]);
}

#[tokio::test]
async fn stop_on_canceled_context_never_reaches_runtime() {
    let harness = Harness::with_local_image();
    let ctx = RunContext::new();
    ctx.cancel();

    let err = harness.runner.stop(&ctx, "container-id").await.unwrap_err();
    assert!(matches!(err, RunnerError::Canceled));
    assert!(harness.calls.all().is_empty());
}
