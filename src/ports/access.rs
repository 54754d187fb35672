/// Who is asking, as resolved by the access gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    Subscriber { id: String },
    Admin { id: String },
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        matches!(self, Principal::Admin { .. })
    }

    /// Active subscription or admin role.
    pub fn can_stream(&self) -> bool {
        matches!(self, Principal::Subscriber { .. } | Principal::Admin { .. })
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Principal::Anonymous => None,
            Principal::Subscriber { id } | Principal::Admin { id } => Some(id),
        }
    }
}

/// Resolves bearer credentials. Authentication itself lives outside this crate.
pub trait AccessGate: Send + Sync {
    fn resolve(&self, bearer: Option<&str>) -> Principal;
}
