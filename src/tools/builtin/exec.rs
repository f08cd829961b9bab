// ── exec tool: run shell commands in the agent's workspace ────────────────
// Grounded on `engine/tool_executor.rs::execute_exec`. Routes through the
// bollard-managed sandbox when the allowance requires it (DM/group scopes),
// falling back to host execution when sandboxing is disabled or fails.

use log::{info, warn};
use std::process::Command as ProcessCommand;

use crate::tools::executor::{ensure_workspace, ToolContext};

const MAX_OUTPUT: usize = 50_000;

pub async fn run(args: &serde_json::Value, ctx: &ToolContext) -> Result<String, String> {
    let command = args["command"].as_str().ok_or("exec: missing 'command' argument")?;
    info!("[tools:exec] {}", &command[..command.len().min(200)]);

    if ctx.sandbox {
        match run_in_sandbox(command).await {
            Ok(out) => return Ok(out),
            Err(e) => warn!("[tools:exec] sandbox execution failed, falling back to host: {}", e),
        }
    }

    let workspace = ensure_workspace(&ctx.agent_id)?;

    let output = if cfg!(target_os = "windows") {
        ProcessCommand::new("cmd").args(["/C", command]).current_dir(&workspace).output()
    } else {
        ProcessCommand::new("sh").args(["-c", command]).current_dir(&workspace).output()
    };

    match output {
        Ok(out) => {
            let stdout = String::from_utf8_lossy(&out.stdout).to_string();
            let stderr = String::from_utf8_lossy(&out.stderr).to_string();

            let mut result = String::new();
            if !stdout.is_empty() {
                result.push_str(&stdout);
            }
            if !stderr.is_empty() {
                if !result.is_empty() {
                    result.push_str("\n--- stderr ---\n");
                }
                result.push_str(&stderr);
            }
            if result.is_empty() {
                result = format!("(exit code: {})", out.status.code().unwrap_or(-1));
            }

            if result.len() > MAX_OUTPUT {
                result.truncate(MAX_OUTPUT);
                result.push_str("\n\n... [output truncated]");
            }

            Ok(result)
        }
        Err(e) => Err(format!("failed to execute command: {}", e)),
    }
}

/// Runs `command` inside a disposable sandbox container via bollard. A
/// minimal busybox-style image is used; callers configure the image through
/// `EngineConfig` in a future revision — for now a fixed default keeps the
/// contract simple and matches what spec §1 scopes as "sandboxed exec".
async fn run_in_sandbox(command: &str) -> Result<String, String> {
    use bollard::container::{Config, RemoveContainerOptions};
    use bollard::Docker;

    let docker = Docker::connect_with_local_defaults().map_err(|e| format!("docker connect failed: {}", e))?;

    let config = Config {
        image: Some("alpine:latest"),
        cmd: Some(vec!["sh", "-c", command]),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        ..Default::default()
    };

    let container = docker
        .create_container::<&str, &str>(None, config)
        .await
        .map_err(|e| format!("sandbox create failed: {}", e))?;

    docker.start_container::<String>(&container.id, None).await.map_err(|e| format!("sandbox start failed: {}", e))?;

    let wait_result = docker.wait_container::<String>(&container.id, None);
    use futures::StreamExt;
    let mut wait_stream = Box::pin(wait_result);
    let _ = wait_stream.next().await;

    let logs_options = bollard::container::LogsOptions::<String> { stdout: true, stderr: true, ..Default::default() };
    let mut logs_stream = docker.logs(&container.id, Some(logs_options));
    let mut output = String::new();
    while let Some(chunk) = logs_stream.next().await {
        if let Ok(log) = chunk {
            output.push_str(&log.to_string());
        }
    }

    let _ = docker.remove_container(&container.id, Some(RemoveContainerOptions { force: true, ..Default::default() })).await;

    if output.len() > MAX_OUTPUT {
        output.truncate(MAX_OUTPUT);
        output.push_str("\n\n... [output truncated]");
    }
    Ok(output)
}
