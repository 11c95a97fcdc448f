//! Exit code definitions for echo-sshd
//!
//! Provides standardized exit codes for different error conditions.

use crate::error::Error;

/// Exit codes for the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// General/unspecified error
    GeneralError = 1,
    /// Configuration error (invalid config, missing required settings)
    ConfigError = 2,
    /// Listening socket could not be bound
    BindError = 3,
    /// Host key or authorized keys could not be loaded or written
    KeyError = 4,
}

impl ExitCode {
    /// Pick the exit code for a failed command
    pub fn from_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<Error>() {
            Some(Error::Config(_)) | Some(Error::TomlParse(_)) => ExitCode::ConfigError,
            Some(Error::Bind { .. }) => ExitCode::BindError,
            Some(Error::KeyStore(_)) | Some(Error::SshKey(_)) => ExitCode::KeyError,
            _ => ExitCode::GeneralError,
        }
    }
}

impl From<ExitCode> for u8 {
    fn from(code: ExitCode) -> Self {
        code as u8
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_bind_error_maps_to_bind_code() {
        let err: anyhow::Error = Error::Bind {
            addr: "127.0.0.1:22".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        }
        .into();
        assert_eq!(ExitCode::from_error(&err), ExitCode::BindError);
    }

    #[test]
    fn test_context_does_not_hide_kind() {
        let result: std::result::Result<(), Error> = Err(Error::Config("bad".to_string()));
        let err = result.context("Failed to load configuration").unwrap_err();
        assert_eq!(ExitCode::from_error(&err), ExitCode::ConfigError);
    }

    #[test]
    fn test_other_errors_are_general() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(ExitCode::from_error(&err), ExitCode::GeneralError);
        assert_eq!(u8::from(ExitCode::KeyError), 4);
    }
}
