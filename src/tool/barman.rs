use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::process::Command;

use super::{
    BackupTool, DeleteOutcome, RemoteBackup, ToolError, parse_backup_list, parse_keep_output,
};
use crate::{
    config::{StorageLocation, ToolConfig},
    models::{KeepStatus, KeepTarget},
};

/// [`BackupTool`] backed by the `barman-cloud-*` executables.
#[derive(Debug, Clone)]
pub struct BarmanCloudTool {
    config: ToolConfig,
}

struct CommandOutput {
    success: bool,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl BarmanCloudTool {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    async fn run(&self, program: &str, args: Vec<String>) -> Result<CommandOutput, ToolError> {
        run_command(program, &args, self.config.timeout()).await
    }

    /// Run a command whose failure is an error.
    async fn run_checked(
        &self,
        program: &str,
        args: Vec<String>,
    ) -> Result<CommandOutput, ToolError> {
        let output = self.run(program, args).await?;
        if !output.success {
            return Err(ToolError::Failed {
                command: program.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}

async fn run_command(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput, ToolError> {
    tracing::debug!(command = program, args = ?args, "Running backup tool");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(result) => result.map_err(|source| ToolError::Spawn {
            command: program.to_string(),
            source,
        })?,
        Err(_) => {
            return Err(ToolError::Timeout {
                command: program.to_string(),
                after: timeout,
            });
        }
    };

    Ok(CommandOutput {
        success: output.status.success(),
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// `--endpoint-url <endpoint> -P <profile>`
fn connection_args(location_id: &str, location: &StorageLocation) -> Vec<String> {
    vec![
        "--endpoint-url".into(),
        location.endpoint.clone(),
        "-P".into(),
        location_id.into(),
    ]
}

fn delete_args(
    location_id: &str,
    location: &StorageLocation,
    db_id: &str,
    backup_id: &str,
) -> Vec<String> {
    let mut args = connection_args(location_id, location);
    args.extend([
        "-b".into(),
        backup_id.into(),
        location.s3_path(),
        db_id.into(),
    ]);
    args
}

fn keep_args(
    location_id: &str,
    location: &StorageLocation,
    db_id: &str,
    backup_id: &str,
    mode: &[&str],
) -> Vec<String> {
    let mut args = connection_args(location_id, location);
    args.extend(mode.iter().map(|s| s.to_string()));
    args.extend([location.s3_path(), db_id.into(), backup_id.into()]);
    args
}

fn list_args(location_id: &str, location: &StorageLocation, db_id: &str) -> Vec<String> {
    let mut args = vec!["--format".into(), "json".into()];
    args.extend(connection_args(location_id, location));
    args.extend([location.s3_path(), db_id.into()]);
    args
}

#[async_trait]
impl BackupTool for BarmanCloudTool {
    async fn delete_backup(
        &self,
        location_id: &str,
        location: &StorageLocation,
        db_id: &str,
        backup_id: &str,
    ) -> Result<DeleteOutcome, ToolError> {
        let output = self
            .run(
                &self.config.delete_command,
                delete_args(location_id, location, db_id, backup_id),
            )
            .await?;

        if output.success {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::Failed {
                exit_code: output.exit_code,
                stderr: output.stderr,
            })
        }
    }

    async fn keep_status(
        &self,
        location_id: &str,
        location: &StorageLocation,
        db_id: &str,
        backup_id: &str,
    ) -> Result<KeepStatus, ToolError> {
        let output = self
            .run_checked(
                &self.config.keep_command,
                keep_args(location_id, location, db_id, backup_id, &["-s"]),
            )
            .await?;
        Ok(parse_keep_output(&output.stdout))
    }

    async fn set_keep(
        &self,
        location_id: &str,
        location: &StorageLocation,
        db_id: &str,
        backup_id: &str,
        target: KeepTarget,
    ) -> Result<(), ToolError> {
        let target = KeepStatus::from(target);
        self.run_checked(
            &self.config.keep_command,
            keep_args(
                location_id,
                location,
                db_id,
                backup_id,
                &["--target", target.as_str()],
            ),
        )
        .await?;
        Ok(())
    }

    async fn release_keep(
        &self,
        location_id: &str,
        location: &StorageLocation,
        db_id: &str,
        backup_id: &str,
    ) -> Result<(), ToolError> {
        self.run_checked(
            &self.config.keep_command,
            keep_args(location_id, location, db_id, backup_id, &["-r"]),
        )
        .await?;
        Ok(())
    }

    async fn list_backups(
        &self,
        location_id: &str,
        location: &StorageLocation,
        db_id: &str,
    ) -> Result<Vec<RemoteBackup>, ToolError> {
        let output = self
            .run_checked(
                &self.config.list_command,
                list_args(location_id, location, db_id),
            )
            .await?;
        parse_backup_list(&self.config.list_command, &output.stdout)
    }
}
