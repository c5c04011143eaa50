use tracing::Level;

/// Named stages of the job pipeline, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStep {
    Processing,
    Preparing,
    Downloading,
    Executing,
    Uploading,
    AckSending,
    NackSending,
    Cancelling,
    Cleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepStatus {
    Starting,
    Success,
    Failure,
}

/// Score attached to every progress event.
pub type Progress = u32;

impl JobStep {
    fn base_progress(self) -> Progress {
        match self {
            JobStep::Processing => 10,
            JobStep::Preparing => 20,
            JobStep::Downloading => 30,
            JobStep::Executing => 40,
            JobStep::Uploading => 50,
            // Terminal message handling; at most one of these runs per job.
            JobStep::AckSending | JobStep::NackSending | JobStep::Cancelling => 60,
            JobStep::Cleanup => 70,
        }
    }

    pub fn progress_for(self, st: StepStatus) -> Progress {
        let offset = match st {
            StepStatus::Starting => 0,
            StepStatus::Success => 1,
            StepStatus::Failure => 2,
        };
        self.base_progress() + offset
    }

    /// True for the event that closes a job's audit trail.
    pub fn completed(self, st: StepStatus) -> bool {
        matches!(self, JobStep::Cleanup | JobStep::Cancelling) && st != StepStatus::Starting
    }

    pub fn level_for(self, st: StepStatus) -> Level {
        match st {
            StepStatus::Failure => Level::ERROR,
            StepStatus::Starting | StepStatus::Success => Level::INFO,
        }
    }
}

impl std::fmt::Display for JobStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStep::Processing => "PROCESSING",
            JobStep::Preparing => "PREPARING",
            JobStep::Downloading => "DOWNLOADING",
            JobStep::Executing => "EXECUTING",
            JobStep::Uploading => "UPLOADING",
            JobStep::AckSending => "ACKSENDING",
            JobStep::NackSending => "NACKSENDING",
            JobStep::Cancelling => "CANCELLING",
            JobStep::Cleanup => "CLEANUP",
        };
        write!(f, "{}", name)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Starting => write!(f, "STARTING"),
            StepStatus::Success => write!(f, "SUCCESS"),
            StepStatus::Failure => write!(f, "FAILURE"),
        }
    }
}
