use serde::{Deserialize, Serialize};
use std::fmt;

/// Process signals that end a guest's logical lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminationSignal {
    Hangup,
    Interrupt,
    Terminate,
    Quit,
}

impl TerminationSignal {
    pub const ALL: [TerminationSignal; 4] = [
        TerminationSignal::Hangup,
        TerminationSignal::Interrupt,
        TerminationSignal::Terminate,
        TerminationSignal::Quit,
    ];

    /// Conventional POSIX name, e.g. `SIGINT`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Hangup => "SIGHUP",
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Quit => "SIGQUIT",
        }
    }
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a guest run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ExitCondition {
    /// The guest left through its own exit path with this status.
    Exited(i32),
    /// The host received a termination signal.
    Signal(TerminationSignal),
}

impl ExitCondition {
    /// Process exit status a launcher should report for this condition.
    ///
    /// Signals follow the shell convention of `128 + signo`.
    pub fn exit_status(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signal(TerminationSignal::Hangup) => 129,
            Self::Signal(TerminationSignal::Interrupt) => 130,
            Self::Signal(TerminationSignal::Quit) => 131,
            Self::Signal(TerminationSignal::Terminate) => 143,
        }
    }
}

impl fmt::Display for ExitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit code {code}"),
            Self::Signal(sig) => write!(f, "signal {sig}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(ExitCondition::Exited(3).to_string(), "exit code 3");
        assert_eq!(
            ExitCondition::Signal(TerminationSignal::Terminate).to_string(),
            "signal SIGTERM"
        );
    }

    #[test]
    fn signal_exit_status_uses_shell_convention() {
        assert_eq!(ExitCondition::Exited(0).exit_status(), 0);
        assert_eq!(
            ExitCondition::Signal(TerminationSignal::Interrupt).exit_status(),
            130
        );
    }

    #[test]
    fn exit_condition_json_shape() {
        let json = serde_json::to_string(&ExitCondition::Signal(TerminationSignal::Hangup)).unwrap();
        assert_eq!(json, r#"{"kind":"signal","value":"hangup"}"#);
    }
}
