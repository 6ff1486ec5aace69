use super::{ContainerRuntime, CreateRequest};
use crate::error::RuntimeError;
use crate::types::{ContainerInfo, ContainerStatus, PortBinding, Protocol};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runtime adapter that shells out to the docker CLI
pub struct DockerCli {
    binary: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectRecord {
    id: String,
    name: String,
    config: InspectConfig,
    state: InspectState,
    network_settings: Option<InspectNetwork>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: String,
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
    started_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetwork {
    ports: Option<HashMap<String, Option<Vec<InspectHostPort>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHostPort {
    host_ip: String,
    host_port: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Spawn one docker command under the configured timeout
    async fn execute(&self, operation: &str, args: &[String]) -> Result<Output, RuntimeError> {
        debug!("{} {}", self.binary, args.join(" "));

        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => {
                warn!("docker {} timed out after {:?}", operation, self.timeout);
                Err(RuntimeError::Timeout {
                    operation: operation.to_string(),
                    seconds: self.timeout.as_secs(),
                })
            }
            Ok(Err(e)) => Err(RuntimeError::failed(operation, e.to_string())),
            Ok(Ok(output)) => Ok(output),
        }
    }

    /// Run one docker command, mapping exit status and stderr onto `RuntimeError`
    async fn run(
        &self,
        operation: &str,
        target: Option<&str>,
        args: Vec<String>,
    ) -> Result<String, RuntimeError> {
        let output = self.execute(operation, &args).await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match target {
            Some(id) if is_not_found(&stderr) => Err(RuntimeError::NotFound { id: id.to_string() }),
            _ => Err(RuntimeError::failed(operation, stderr)),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn list(&self) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let stdout = self
            .run(
                "list",
                None,
                vec!["ps".into(), "-a".into(), "-q".into(), "--no-trunc".into()],
            )
            .await?;
        let ids: Vec<String> = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // `ps` renders labels as one comma-joined string; inspect keeps them as a map.
        let mut args: Vec<String> = vec!["inspect".into(), "--type".into(), "container".into()];
        args.extend(ids);
        let output = self.execute("list", &args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !is_not_found(&stderr) {
                return Err(RuntimeError::failed("list", stderr.trim()));
            }
            // Removed between `ps` and `inspect`; the rest is still on stdout.
            debug!("Skipping vanished containers: {}", stderr.trim());
        }
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        parse_inspect_output(&stdout)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, RuntimeError> {
        let stdout = self
            .run(
                "inspect",
                Some(id),
                vec!["inspect".into(), "--type".into(), "container".into(), id.into()],
            )
            .await?;
        parse_inspect_output(&stdout)?
            .into_iter()
            .next()
            .ok_or_else(|| RuntimeError::NotFound { id: id.to_string() })
    }

    async fn create(&self, request: &CreateRequest) -> Result<String, RuntimeError> {
        let stdout = self.run("create", None, create_args(request)).await?;
        let id = stdout.trim().lines().last().unwrap_or_default().trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::failed("create", "docker returned no container id"));
        }
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.run("start", Some(id), vec!["start".into(), id.into()])
            .await
            .map(|_| ())
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.run("stop", Some(id), vec!["stop".into(), id.into()])
            .await
            .map(|_| ())
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        self.run("remove", Some(id), vec!["rm".into(), id.into()])
            .await
            .map(|_| ())
    }

    async fn rename(&self, id: &str, new_name: &str) -> Result<(), RuntimeError> {
        self.run(
            "rename",
            Some(id),
            vec!["rename".into(), id.into(), new_name.into()],
        )
        .await
        .map(|_| ())
    }
}

fn create_args(request: &CreateRequest) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        request.name.clone(),
        "--restart".to_string(),
        request.restart_policy.as_str().to_string(),
    ];
    for (key, value) in &request.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }
    for port in &request.ports {
        args.push("-p".to_string());
        args.push(port.publish_arg());
    }
    for (key, value) in &request.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.push(request.image.clone());
    args
}

fn is_not_found(stderr: &str) -> bool {
    stderr.to_ascii_lowercase().contains("no such container")
}

fn parse_inspect_output(stdout: &str) -> Result<Vec<ContainerInfo>, RuntimeError> {
    let records: Vec<InspectRecord> = serde_json::from_str(stdout)
        .map_err(|e| RuntimeError::failed("inspect", format!("unreadable inspect output: {}", e)))?;

    Ok(records
        .into_iter()
        .map(|record| {
            let mut ports: Vec<PortBinding> = record
                .network_settings
                .and_then(|n| n.ports)
                .unwrap_or_default()
                .into_iter()
                .flat_map(|(key, bindings)| {
                    let (container_port, proto) =
                        key.split_once('/').unwrap_or((key.as_str(), "tcp"));
                    let container_port: Option<u16> = container_port.parse().ok();
                    let protocol = proto.parse().unwrap_or(Protocol::Tcp);
                    bindings
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(move |b| {
                            Some(PortBinding {
                                host_ip: b.host_ip,
                                host_port: b.host_port.parse().ok()?,
                                container_port: container_port?,
                                protocol,
                            })
                        })
                        .collect::<Vec<_>>()
                })
                .collect();
            ports.sort_by_key(|p| (p.host_port, p.container_port));

            let started_at = record
                .state
                .started_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .filter(|dt| dt.year() > 1);

            ContainerInfo {
                id: record.id,
                name: record.name.trim_start_matches('/').to_string(),
                image: record.config.image,
                status: ContainerStatus::from_runtime_state(&record.state.status),
                ports,
                labels: record.config.labels.unwrap_or_default(),
                started_at,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::ComposeParser;
    use crate::runtime::{GROUP_LABEL, SERVICE_LABEL, container_name};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_inspect_output() {
        let stdout = r#"[{
            "Id": "abc123",
            "Name": "/shop_web",
            "Config": {"Image": "nginx:1.25", "Labels": {"dumont.group": "shop"}},
            "State": {"Status": "running", "StartedAt": "2024-01-15T10:30:00.123456789Z"},
            "NetworkSettings": {"Ports": {"80/tcp": [{"HostIp": "0.0.0.0", "HostPort": "8080"}], "443/tcp": null}}
        }]"#;

        let info = parse_inspect_output(stdout).unwrap().remove(0);
        assert_eq!(info.name, "shop_web");
        assert_eq!(info.image, "nginx:1.25");
        assert_eq!(info.status, ContainerStatus::Running);
        assert_eq!(info.ports.len(), 1);
        assert_eq!(info.ports[0].display(), "0.0.0.0:8080->80/tcp");
        assert_eq!(
            info.started_at.map(|t| t.to_rfc3339()),
            Some("2024-01-15T10:30:00.123456789+00:00".to_string())
        );
    }

    #[test]
    fn test_labels_keep_separator_characters() {
        let stdout = r#"[{"Id":"x1","Name":"/x1","Config":{"Image":"nginx","Labels":{"dumont.group":"a,b","dumont.service":"web=1"}},"State":{"Status":"running","StartedAt":"2024-01-15T10:30:00Z"},"NetworkSettings":null}]"#;
        let info = parse_inspect_output(stdout).unwrap().remove(0);
        assert_eq!(info.label(GROUP_LABEL), Some("a,b"));
        assert_eq!(info.label(SERVICE_LABEL), Some("web=1"));
    }

    #[test]
    fn test_never_started_container_has_no_start_time() {
        let stdout = r#"[{"Id":"x","Name":"/x","Config":{"Image":"a","Labels":null},"State":{"Status":"created","StartedAt":"0001-01-01T00:00:00Z"},"NetworkSettings":null}]"#;
        let info = parse_inspect_output(stdout).unwrap().remove(0);
        assert_eq!(info.status, ContainerStatus::Stopped);
        assert_eq!(info.started_at, None);
    }

    #[cfg(unix)]
    fn fake_docker(dir: &tempfile::TempDir, script: &str) -> DockerCli {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("docker");
        std::fs::write(&path, format!("#!/bin/sh\n{}", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        DockerCli::new(path.to_string_lossy(), Duration::from_secs(5))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_reads_labels_through_inspect() {
        let dir = tempfile::tempdir().unwrap();
        let docker = fake_docker(
            &dir,
            r#"case "$1" in
  ps) printf 'x1\nx2\n' ;;
  inspect)
    printf '%s' '[{"Id":"x1","Name":"/a-b_web","Config":{"Image":"nginx","Labels":{"dumont.group":"a,b","dumont.service":"web"}},"State":{"Status":"running","StartedAt":"2024-01-15T10:30:00Z"},"NetworkSettings":{"Ports":{"80/tcp":[{"HostIp":"0.0.0.0","HostPort":"3223"}]}}}]'
    echo 'Error: No such container: x2' >&2
    exit 1 ;;
esac
"#,
        );

        let containers = docker.list().await.unwrap();
        assert_eq!(containers.len(), 1, "x2 vanished between ps and inspect");
        assert_eq!(containers[0].id, "x1");
        assert_eq!(containers[0].label(GROUP_LABEL), Some("a,b"));
        assert_eq!(containers[0].ports[0].display(), "0.0.0.0:3223->80/tcp");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_with_no_containers_skips_inspect() {
        let dir = tempfile::tempdir().unwrap();
        let docker = fake_docker(
            &dir,
            r#"case "$1" in
  ps) ;;
  *) echo 'unexpected call' >&2; exit 1 ;;
esac
"#,
        );
        assert!(docker.list().await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_daemon_errors_surface_as_failures() {
        let dir = tempfile::tempdir().unwrap();
        let docker = fake_docker(
            &dir,
            r#"echo 'Cannot connect to the Docker daemon at unix:///var/run/docker.sock' >&2
exit 1
"#,
        );
        let err = docker.list().await.unwrap_err();
        assert_eq!(err.kind(), "OperationFailed");
        let err = docker.stop("abc").await.unwrap_err();
        assert_eq!(err.kind(), "OperationFailed");
    }

    #[test]
    fn test_create_args() {
        let parsed = ComposeParser::parse(
            "services: {dns: {image: coredns, ports: [\"53:53/udp\"], restart: always, environment: {A: b}}}",
        )
        .unwrap();
        let request = CreateRequest::for_service("infra", &parsed.services[0]);
        let args = create_args(&request);
        let name = container_name("infra", "dns");

        assert_eq!(&args[..5], &["create", "--name", name.as_str(), "--restart", "always"]);
        assert!(args.windows(2).any(|w| w == ["-p", "53:53/udp"]));
        assert!(args.windows(2).any(|w| w == ["-e", "A=b"]));
        assert!(args.windows(2).any(|w| w == ["--label", "dumont.group=infra"]));
        assert_eq!(args.last().map(String::as_str), Some("coredns"));
    }

    #[test]
    fn test_not_found_detection() {
        assert!(is_not_found("Error response from daemon: No such container: abc"));
        assert!(!is_not_found("Error response from daemon: conflict"));
    }
}
