use miette::Diagnostic;
use thiserror::Error;

/// Controller error type for reconciliation passes
#[derive(Error, Debug, Diagnostic)]
pub enum ControllerError {
    /// Optimistic-concurrency conflict on write
    #[error("Conflict writing {kind} '{key}': {message}")]
    #[diagnostic(
        code(infrabox::controller::conflict),
        help("The object changed since it was read. The key is retried with backoff and re-read on the next pass")
    )]
    Conflict {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        key: String,
        #[allow(unused)]
        message: String,
    },

    /// API server request failed
    #[error("API request failed: {message}")]
    #[diagnostic(
        code(infrabox::controller::api_error),
        help("Check that the API server at --api-url is reachable and that the token grants access")
    )]
    ApiError {
        #[allow(unused)]
        message: String,
    },

    /// Kind could not be resolved through discovery
    #[error("Unknown resource kind {kind} in {api_version}")]
    #[diagnostic(
        code(infrabox::controller::unknown_kind),
        help("Register the resource definition for '{api_version}' before declaring it as a job service")
    )]
    UnknownKind {
        #[allow(unused)]
        api_version: String,
        #[allow(unused)]
        kind: String,
    },

    /// An auxiliary service reported its own failure
    #[error("Failed to create service {service}: {message}")]
    #[diagnostic(
        code(infrabox::controller::service_failed),
        help("Inspect the status of the service object; the job stays in error until it is recreated")
    )]
    ServiceFailed {
        #[allow(unused)]
        service: String,
        #[allow(unused)]
        message: String,
    },

    /// Job token could not be minted
    #[error("Failed to create job token: {message}")]
    #[diagnostic(
        code(infrabox::controller::token_error),
        help("Verify that --rsa-private-key-path points to a readable PEM encoded RSA private key")
    )]
    TokenError {
        #[allow(unused)]
        message: String,
    },

    /// Command execution failed
    #[error("Command '{command}' failed with exit code {exit_code}")]
    #[diagnostic(code(infrabox::controller::command_failed), help("output: {stderr}"))]
    CommandFailed {
        #[allow(unused)]
        command: String,
        #[allow(unused)]
        exit_code: i32,
        #[allow(unused)]
        stderr: String,
    },

    /// Command output could not be interpreted
    #[error("Could not parse output of '{command}': {message}")]
    #[diagnostic(
        code(infrabox::controller::malformed_output),
        help("Check that the installed CLI supports `--format json`")
    )]
    MalformedOutput {
        #[allow(unused)]
        command: String,
        #[allow(unused)]
        message: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(infrabox::controller::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    CoreError(#[from] infrabox_core::InfraboxError),
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    pub fn conflict(
        kind: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn api_error(message: impl Into<String>) -> Self {
        Self::ApiError {
            message: message.into(),
        }
    }

    pub fn unknown_kind(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::UnknownKind {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    pub fn service_failed(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ServiceFailed {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn token_error(message: impl Into<String>) -> Self {
        Self::TokenError {
            message: message.into(),
        }
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

    pub fn malformed_output(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedOutput {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Whether a later pass may succeed without anyone changing the resource
    ///
    /// Transient errors are retried with backoff; everything else is written
    /// to the resource status and sticks.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::ApiError { .. } | Self::CommandFailed { .. }
        )
    }
}
