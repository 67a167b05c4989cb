//! Request context.
//!
//! Carried through every BMC call for attribution. Tool handlers build a
//! context naming the calling agent; internal operations (workers,
//! reconciliation) use the root context.

#[derive(Debug, Clone)]
pub struct Ctx {
    caller: Option<String>,
}

impl Ctx {
    /// Context for system-internal operations.
    pub fn root_ctx() -> Self {
        Self { caller: None }
    }

    /// Context attributed to a named agent.
    pub fn for_agent(name: impl Into<String>) -> Self {
        Self {
            caller: Some(name.into()),
        }
    }

    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }
}

impl Default for Ctx {
    fn default() -> Self {
        Self::root_ctx()
    }
}
