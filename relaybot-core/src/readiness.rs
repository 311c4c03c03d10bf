use std::sync::atomic::{AtomicBool, Ordering};

/// Startup gates; the process is ready only when all four are set.
#[derive(Debug, Default)]
pub struct Readiness {
    api: AtomicBool,
    object: AtomicBool,
    database: AtomicBool,
    membership: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ReadinessFlags {
    pub api: bool,
    pub object: bool,
    pub database: bool,
    pub membership: bool,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_api_ready(&self) {
        self.api.store(true, Ordering::SeqCst);
    }

    pub fn set_object_ready(&self) {
        self.object.store(true, Ordering::SeqCst);
    }

    pub fn set_database_ready(&self) {
        self.database.store(true, Ordering::SeqCst);
    }

    pub fn set_membership_ready(&self) {
        self.membership.store(true, Ordering::SeqCst);
    }

    pub fn flags(&self) -> ReadinessFlags {
        ReadinessFlags {
            api: self.api.load(Ordering::SeqCst),
            object: self.object.load(Ordering::SeqCst),
            database: self.database.load(Ordering::SeqCst),
            membership: self.membership.load(Ordering::SeqCst),
        }
    }

    pub fn is_ready(&self) -> bool {
        let flags = self.flags();
        flags.api && flags.object && flags.database && flags.membership
    }
}
