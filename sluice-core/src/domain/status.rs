//! Pipeline status and the transition table

use serde::{Deserialize, Serialize};

/// Lifecycle status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Edited,
    Starting,
    StartError,
    Running,
    RunningError,
    RunError,
    Finishing,
    Finished,
    Stopping,
    Stopped,
    Disconnecting,
    Disconnected,
    Connecting,
    Killed,
}

impl PipelineStatus {
    /// All statuses, in declaration order
    pub const ALL: [PipelineStatus; 14] = [
        PipelineStatus::Edited,
        PipelineStatus::Starting,
        PipelineStatus::StartError,
        PipelineStatus::Running,
        PipelineStatus::RunningError,
        PipelineStatus::RunError,
        PipelineStatus::Finishing,
        PipelineStatus::Finished,
        PipelineStatus::Stopping,
        PipelineStatus::Stopped,
        PipelineStatus::Disconnecting,
        PipelineStatus::Disconnected,
        PipelineStatus::Connecting,
        PipelineStatus::Killed,
    ];

    /// Whether a run in this status still owns runtime resources
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PipelineStatus::Starting
                | PipelineStatus::Running
                | PipelineStatus::RunningError
                | PipelineStatus::Finishing
                | PipelineStatus::Stopping
                | PipelineStatus::Disconnecting
                | PipelineStatus::Connecting
        )
    }

    /// Statuses reachable from this one in a single transition
    pub fn successors(self) -> &'static [PipelineStatus] {
        use PipelineStatus::*;
        match self {
            Edited => &[Starting],
            Starting => &[StartError, Running, Disconnecting, Stopping],
            StartError => &[Starting],
            Running => &[RunningError, Finishing, Stopping, Disconnecting],
            RunningError => &[RunError],
            RunError => &[Starting],
            Finishing => &[Finished],
            Stopping => &[Stopped],
            Finished => &[Starting],
            Stopped => &[Starting],
            Disconnecting => &[Disconnected],
            Disconnected => &[Connecting],
            Connecting => &[Starting, Disconnecting],
            Killed => &[],
        }
    }

    /// Returns `true` if `to` is listed in the transition table for this status
    pub fn can_transition_to(self, to: PipelineStatus) -> bool {
        self.successors().contains(&to)
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineStatus::Edited => "EDITED",
            PipelineStatus::Starting => "STARTING",
            PipelineStatus::StartError => "START_ERROR",
            PipelineStatus::Running => "RUNNING",
            PipelineStatus::RunningError => "RUNNING_ERROR",
            PipelineStatus::RunError => "RUN_ERROR",
            PipelineStatus::Finishing => "FINISHING",
            PipelineStatus::Finished => "FINISHED",
            PipelineStatus::Stopping => "STOPPING",
            PipelineStatus::Stopped => "STOPPED",
            PipelineStatus::Disconnecting => "DISCONNECTING",
            PipelineStatus::Disconnected => "DISCONNECTED",
            PipelineStatus::Connecting => "CONNECTING",
            PipelineStatus::Killed => "KILLED",
        };
        f.write_str(name)
    }
}
