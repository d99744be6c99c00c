//! The storage-layout axis (spec §3, §9 DESIGN NOTES). A tagged enum with
//! free `encode`/`decode` dispatch functions, not a class hierarchy — there
//! are exactly four variants and no other axis of polymorphism is needed.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behavior {
    MetadataOnly,
    BodyOnly,
    #[default]
    Mixed,
    UserManaged,
}

impl Behavior {
    pub fn as_str(self) -> &'static str {
        match self {
            Behavior::MetadataOnly => "metadata-only",
            Behavior::BodyOnly => "body-only",
            Behavior::Mixed => "mixed",
            Behavior::UserManaged => "user-managed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "metadata-only" => Some(Behavior::MetadataOnly),
            "body-only" => Some(Behavior::BodyOnly),
            "mixed" => Some(Behavior::Mixed),
            "user-managed" => Some(Behavior::UserManaged),
            _ => None,
        }
    }
}
