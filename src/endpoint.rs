//! Gateway/feedback endpoint resolution. The legacy binary protocol speaks
//! directly to a `(host, port)` pair per service rather than an HTTP base
//! URL, so `Mode` resolves to host/port tuples.

use std::fmt::Debug;
use std::str::FromStr;

/// Apple Push Service environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Production,
    Sandbox,
}

impl Mode {
    /// `(host, port)` for the gateway (send) connection.
    pub fn gateway_addr(&self) -> (&'static str, u16) {
        match self {
            Self::Production => ("gateway.push.apple.com", 2195),
            Self::Sandbox => ("gateway.sandbox.push.apple.com", 2195),
        }
    }

    /// `(host, port)` for the feedback connection.
    pub fn feedback_addr(&self) -> (&'static str, u16) {
        match self {
            Self::Production => ("feedback.push.apple.com", 2196),
            Self::Sandbox => ("feedback.sandbox.push.apple.com", 2196),
        }
    }
}

impl Default for Mode {
    fn default() -> Self {
        Self::Production
    }
}

impl FromStr for Mode {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("production") || s.eq_ignore_ascii_case("prod") {
            Ok(Self::Production)
        } else if s.eq_ignore_ascii_case("sandbox") || s.eq_ignore_ascii_case("dev") {
            Ok(Self::Sandbox)
        } else {
            Err(ModeParseError(s.to_owned()))
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized APS mode: {0:?} (expected \"production\" or \"sandbox\")")]
pub struct ModeParseError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_production_addresses() {
        assert_eq!(
            Mode::Production.gateway_addr(),
            ("gateway.push.apple.com", 2195)
        );
        assert_eq!(
            Mode::Production.feedback_addr(),
            ("feedback.push.apple.com", 2196)
        );
    }

    #[test]
    fn resolves_sandbox_addresses() {
        assert_eq!(
            Mode::Sandbox.gateway_addr(),
            ("gateway.sandbox.push.apple.com", 2195)
        );
        assert_eq!(
            Mode::Sandbox.feedback_addr(),
            ("feedback.sandbox.push.apple.com", 2196)
        );
    }

    #[test]
    fn parses_from_str() {
        assert_eq!("production".parse::<Mode>().unwrap(), Mode::Production);
        assert_eq!("sandbox".parse::<Mode>().unwrap(), Mode::Sandbox);
        assert!("bogus".parse::<Mode>().is_err());
    }
}
