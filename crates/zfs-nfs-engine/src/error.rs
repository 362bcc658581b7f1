use miette::Diagnostic;
use thiserror::Error;

/// Error type for storage pool operations
#[derive(Error, Debug, Diagnostic)]
pub enum EngineError {
    /// Dataset not found
    #[error("Dataset not found: {name}")]
    #[diagnostic(
        code(zfs_nfs::engine::dataset_not_found),
        help("Verify the dataset exists with `zfs list -t all {name}`")
    )]
    DatasetNotFound {
        #[allow(unused)]
        name: String,
    },

    /// Command execution failed
    #[error("Command '{command}' failed with exit code {exit_code}")]
    #[diagnostic(code(zfs_nfs::engine::command_failed), help("stderr: {stderr}"))]
    CommandFailed {
        #[allow(unused)]
        command: String,
        #[allow(unused)]
        exit_code: i32,
        #[allow(unused)]
        stderr: String,
    },

    /// The zfs CLI printed something we could not parse
    #[error("Unexpected output from '{command}': {message}")]
    #[diagnostic(
        code(zfs_nfs::engine::unexpected_output),
        help("The installed zfs CLI may be incompatible. Run the command by hand and compare its output with `zfs list -H -p`")
    )]
    UnexpectedOutput {
        #[allow(unused)]
        command: String,
        #[allow(unused)]
        message: String,
    },

    /// Changing the owner of a mountpoint failed
    #[error("Failed to change ownership of '{path}': {message}")]
    #[diagnostic(
        code(zfs_nfs::engine::ownership_failed),
        help("The provisioner must run as root (or hold CAP_CHOWN) and the dataset must be mounted")
    )]
    OwnershipFailed {
        #[allow(unused)]
        path: String,
        #[allow(unused)]
        message: String,
    },

    /// Failure injected by the mock engine
    #[error("Injected failure for {operation} on '{target}'")]
    #[diagnostic(
        code(zfs_nfs::engine::injected),
        help("This error only comes from MockPoolEngine::fail_on")
    )]
    Injected {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        target: String,
    },
}

/// Result type alias for pool engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn dataset_not_found(name: impl Into<String>) -> Self {
        Self::DatasetNotFound { name: name.into() }
    }

    pub fn command_failed(
        command: impl Into<String>,
        exit_code: i32,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    pub fn unexpected_output(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnexpectedOutput {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn ownership_failed(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OwnershipFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn injected(operation: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Injected {
            operation: operation.into(),
            target: target.into(),
        }
    }

    /// The most specific text the engine gave for this failure.
    ///
    /// For a failed command this is the trimmed stderr of zfs, which is what
    /// an operator needs to see ("out of space", "dataset is busy").
    pub fn detail(&self) -> String {
        match self {
            Self::CommandFailed { stderr, .. } if !stderr.trim().is_empty() => {
                stderr.trim().to_string()
            }
            other => other.to_string(),
        }
    }
}
