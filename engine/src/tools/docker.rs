//! DockerAgent: containers, images and compose stacks
//!
//! Tools shell out to the `docker` CLI. Container names come from task text,
//! so they are checked before they reach an argv.

use sdk::errors::StewardError;
use sdk::types::ToolInput;
use serde_json::json;

use super::{tool_path, PATH_TOKEN};
use crate::agent::DomainHandler;
use crate::dispatch::{Action, ParamKind, ParamSpec, Tool};
use crate::permissions::Operation;

pub const NAME: &str = "DockerAgent";

const CONTAINER_TOKEN: &str = r"([A-Za-z0-9][A-Za-z0-9_.-]*)";

/// Docker's own naming rule; also keeps flags out of the argv
fn container(input: &ToolInput) -> Result<&str, StewardError> {
    let name = input.arg_str("container")?;
    let valid = name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(name)
    } else {
        Err(StewardError::InvalidArgs(format!(
            "not a container name: {:?}",
            name
        )))
    }
}

fn docker(args: &[&str]) -> Action {
    Action::command(std::iter::once("docker").chain(args.iter().copied()))
}

pub fn handler() -> Result<DomainHandler, StewardError> {
    let named = |verbs: &str| {
        format!(
            r"(?i)\b(?:{})\s+(?:the\s+)?(?:container\s+)?{}",
            verbs, CONTAINER_TOKEN
        )
    };

    DomainHandler::new(
        NAME,
        "Containers: list containers and images, start or stop containers, logs, compose stacks",
    )
    .with_tools(vec![
        Tool::new("list_containers", "All containers with their status", Operation::Read, |_: &ToolInput| {
            Ok(docker(&["ps", "-a", "--format", "{{.Names}}\t{{.Image}}\t{{.Status}}"]))
        })
        .strong(&["docker ps", "list containers", "containers"])
        .weak(&["container", "running", "list"]),
        Tool::new("list_images", "Local images and their sizes", Operation::Read, |_: &ToolInput| {
            Ok(docker(&["images", "--format", "{{.Repository}}:{{.Tag}}\t{{.Size}}"]))
        })
        .strong(&["docker images", "list images", "images"])
        .weak(&["image"]),
        Tool::new("start_container", "Start a stopped container", Operation::Execute, |input: &ToolInput| {
            Ok(docker(&["start", container(input)?]))
        })
        .strong(&["start container", "docker start"])
        .weak(&["start", "container"])
        .param(ParamSpec::required("container", ParamKind::String))
        .extract("container", &named("start"))?,
        Tool::new("stop_container", "Stop a running container", Operation::Execute, |input: &ToolInput| {
            Ok(docker(&["stop", container(input)?]))
        })
        .strong(&["stop container", "docker stop"])
        .weak(&["stop", "halt", "container"])
        .param(ParamSpec::required("container", ParamKind::String))
        .extract("container", &named("stop|halt"))?,
        Tool::new("container_logs", "Last lines of a container's log", Operation::Read, |input: &ToolInput| {
            let tail = input.arg_i64_opt("tail").unwrap_or(50).clamp(1, 5000).to_string();
            Ok(docker(&["logs", "--tail", tail.as_str(), container(input)?]))
        })
        .strong(&["docker logs", "container logs"])
        .weak(&["logs", "log", "container"])
        .param(ParamSpec::required("container", ParamKind::String))
        .param(ParamSpec::optional("tail", ParamKind::Integer).with_default(json!(50)))
        .extract("container", &named(r"logs?\s+(?:of|for|from)"))?
        .extract("tail", r"(?i)\b(?:last|tail)\s+(\d+)")?,
        Tool::new("compose_up", "Bring up a compose stack in the background", Operation::Execute, |input: &ToolInput| {
            let dir = tool_path(input.arg_str_opt("path").unwrap_or("."))?;
            Ok(Action::command(["docker-compose", "up", "-d"]).in_dir(dir))
        })
        .strong(&["docker-compose up", "docker compose up", "compose up"])
        .weak(&["compose", "stack", "up"])
        .param(ParamSpec::optional("path", ParamKind::String).with_default(json!(".")))
        .extract("path", &format!(r"(?i)\b(?:in|from|for)\s+{}", PATH_TOKEN))?,
    ])
}
