//! Read-only execution context handed to a stage.

use crate::config::OrchestratorConfig;
use crate::core::StageKind;
use crate::session::Session;
use uuid::Uuid;

/// Everything a stage may consult besides the envelope.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    /// Run identifier.
    pub run_id: Uuid,
    /// The stage being executed.
    pub stage: StageKind,
    /// Orchestrator configuration.
    pub config: &'a OrchestratorConfig,
    /// Leased collaborator session, for stages that use one.
    pub session: Option<&'a Session>,
    /// Attempt number, starting at 1.
    pub attempt: u32,
}

impl<'a> StageContext<'a> {
    /// Creates a context for the first attempt without a session.
    #[must_use]
    pub const fn new(run_id: Uuid, stage: StageKind, config: &'a OrchestratorConfig) -> Self {
        Self {
            run_id,
            stage,
            config,
            session: None,
            attempt: 1,
        }
    }

    /// Attaches a leased session.
    #[must_use]
    pub const fn with_session(mut self, session: Option<&'a Session>) -> Self {
        self.session = session;
        self
    }

    /// Sets the attempt number.
    #[must_use]
    pub const fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Id of the leased session, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<u64> {
        self.session.map(Session::id)
    }
}
