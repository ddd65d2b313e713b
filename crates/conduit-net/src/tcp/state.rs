//! Lifecycle state of a TCP server.

/// Current lifecycle state of a TCP server.
///
/// ```text
/// Unstarted --start--> Running --stop--> Stopping --> Stopped --start--> Running
///     any state --dispose--> Disposed (terminal)
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ServerLifecycleState {
    /// Bound, but the accept loop has never run.
    #[default]
    Unstarted,
    /// The accept loop is running.
    Running,
    /// A stop request is being carried out.
    Stopping,
    /// The accept loop has exited.
    Stopped,
    /// The listening socket has been released. Terminal.
    Disposed,
}

impl ServerLifecycleState {
    /// Whether the state can never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disposed)
    }
}

impl std::fmt::Display for ServerLifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unstarted => write!(f, "Unstarted"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Disposed => write!(f, "Disposed"),
        }
    }
}
