use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// This enum contains all error messages this library can return.
///
/// Only construction-time and parsing APIs return it. The game loop itself never
/// fails: runtime inconsistencies are reported through [`telemetry`] and the game
/// continues.
///
/// [`telemetry`]: crate::telemetry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DuelError {
    /// A byte sequence could not be interpreted as a frame.
    InvalidFrame {
        /// Why the bytes were rejected.
        reason: String,
    },
    /// A well-formed frame carried a command code this build does not know.
    UnknownCommand {
        /// The unrecognized command byte.
        code: u8,
    },
    /// You made an invalid request, usually by using wrong parameters for function calls.
    InvalidRequest {
        /// Further specifies why the request was invalid.
        info: String,
    },
    /// A configuration value is outside its accepted range.
    ConfigValueOutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Smallest accepted value.
        min: u64,
        /// Largest accepted value.
        max: u64,
        /// The value that was supplied.
        actual: u64,
    },
    /// The underlying transport failed to open or bind.
    TransportError {
        /// A description of the transport failure.
        context: String,
    },
}

impl Display for DuelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuelError::InvalidFrame { reason } => {
                write!(f, "Invalid frame: {}", reason)
            }
            DuelError::UnknownCommand { code } => {
                write!(f, "Unknown command code 0x{:02X}", code)
            }
            DuelError::InvalidRequest { info } => {
                write!(f, "Invalid Request: {}", info)
            }
            DuelError::ConfigValueOutOfRange {
                field,
                min,
                max,
                actual,
            } => {
                write!(
                    f,
                    "Configuration value {} = {} is outside the accepted range {}..={}",
                    field, actual, min, max
                )
            }
            DuelError::TransportError { context } => {
                write!(f, "Transport error: {}", context)
            }
        }
    }
}

impl Error for DuelError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_field_and_range() {
        let err = DuelError::ConfigValueOutOfRange {
            field: "max_retries",
            min: 1,
            max: 16,
            actual: 0,
        };
        let text = err.to_string();
        assert!(text.contains("max_retries"));
        assert!(text.contains("1..=16"));
    }

    #[test]
    fn unknown_command_is_hex_formatted() {
        let err = DuelError::UnknownCommand { code: 0x7A };
        assert_eq!(err.to_string(), "Unknown command code 0x7A");
    }
}
