use crate::api::{ApiError, EnrollmentStatus};
use crate::capture::Capture;
use crate::phrase;

pub const DEFAULT_SAMPLES_REQUIRED: u32 = 5;

/// Enrollment progresses strictly forward; the sample count is always the
/// server-reported value, never a local increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentStage {
    ProfilePending,
    Collecting { collected: u32, required: u32 },
    Enrolled,
}

#[derive(Debug)]
pub struct EnrollmentWorkflow {
    stage: EnrollmentStage,
    name: String,
    username: String,
    /// Local default until the server reports its own requirement.
    required_hint: u32,
}

impl EnrollmentWorkflow {
    pub fn new(required: u32) -> Self {
        Self {
            stage: EnrollmentStage::ProfilePending,
            name: String::new(),
            username: String::new(),
            required_hint: required,
        }
    }

    pub fn stage(&self) -> EnrollmentStage {
        self.stage
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Validate the identity fields and enter the collecting stage.
    /// Both fields must be non-empty after trimming.
    pub fn submit_profile(&mut self, name: &str, username: &str) -> Result<(), ApiError> {
        if self.stage != EnrollmentStage::ProfilePending {
            return Ok(());
        }
        let name = name.trim();
        let username = username.trim();
        if name.is_empty() || username.is_empty() {
            return Err(ApiError::Validation(
                "Please fill in both fields".to_string(),
            ));
        }
        self.name = name.to_string();
        self.username = username.to_string();
        self.stage = EnrollmentStage::Collecting {
            collected: 0,
            required: self.required_hint,
        };
        Ok(())
    }

    /// A sample may be submitted only while collecting, once the phrase is
    /// complete and the sample is long enough to be meaningful.
    pub fn can_submit(&self, capture: &Capture) -> bool {
        matches!(self.stage, EnrollmentStage::Collecting { .. })
            && phrase::is_complete(capture.typed_text())
            && capture.meets_minimum()
    }

    /// The first accepted submission registers the identity and carries the
    /// first sample; later ones only add samples.
    pub fn is_first_sample(&self) -> bool {
        matches!(
            self.stage,
            EnrollmentStage::Collecting { collected: 0, .. }
        )
    }

    /// Fold in a server response. The reported count replaces the local one
    /// (but never rolls it back); only a server-reported `is_enrolled` can
    /// finish the workflow. `Enrolled` is terminal.
    pub fn apply_status(&mut self, status: &EnrollmentStatus) {
        let EnrollmentStage::Collecting { collected, .. } = self.stage else {
            return;
        };
        self.required_hint = status.samples_required;
        if status.is_enrolled {
            self.stage = EnrollmentStage::Enrolled;
        } else {
            self.stage = EnrollmentStage::Collecting {
                collected: status.samples_collected.max(collected),
                required: status.samples_required,
            };
        }
    }

    pub fn progress(&self) -> (u32, u32) {
        match self.stage {
            EnrollmentStage::ProfilePending => (0, self.required_hint),
            EnrollmentStage::Collecting {
                collected,
                required,
            } => (collected, required),
            EnrollmentStage::Enrolled => (self.required_hint, self.required_hint),
        }
    }
}
