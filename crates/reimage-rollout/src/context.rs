//! Per-run context shared by every engine step.

use tokio::sync::watch;

use reimage_fleet::Clients;

use crate::backoff::BackoffProfiles;

/// Collaborators, polling policy, and flags for one run.
///
/// Cheap to clone; each concurrent swap task owns its own copy.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub clients: Clients,
    pub profiles: BackoffProfiles,
    /// Issue every mutating call as a validation-only request.
    pub dry_run: bool,
    shutdown: watch::Receiver<bool>,
}

impl RunContext {
    pub fn new(clients: Clients) -> Self {
        // A receiver whose sender is dropped never reports shutdown.
        let (_, shutdown) = watch::channel(false);
        Self {
            clients,
            profiles: BackoffProfiles::default(),
            dry_run: false,
            shutdown,
        }
    }

    pub fn with_profiles(mut self, profiles: BackoffProfiles) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Abort in-flight polls once `shutdown` turns `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown(&self) -> &watch::Receiver<bool> {
        &self.shutdown
    }
}
