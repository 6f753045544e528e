use serde::Deserialize;
use serde::Serialize;

/// A user's authorization level on a diagram's parent threat model.
///
/// `Writer` is a superset of `Reader`; `Owner` is a superset of `Writer`
/// (spec.md §3). The derived `Ord` gives `reader < writer < owner`, which
/// lets call sites write `role >= Role::Writer` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Reader,
    Writer,
    Owner,
}

impl Role {
    pub fn can_mutate(self) -> bool {
        self >= Role::Writer
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Reader => "reader",
            Role::Writer => "writer",
            Role::Owner => "owner",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_spec() {
        assert!(Role::Reader < Role::Writer);
        assert!(Role::Writer < Role::Owner);
        assert!(Role::Writer.can_mutate());
        assert!(!Role::Reader.can_mutate());
    }
}
