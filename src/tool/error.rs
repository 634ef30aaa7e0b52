use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' did not finish within {}s", .after.as_secs())]
    Timeout { command: String, after: Duration },

    #[error("'{command}' exited with {}: {stderr}", describe_exit(.exit_code))]
    Failed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Unexpected output from '{command}': {message}")]
    Parse { command: String, message: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}
