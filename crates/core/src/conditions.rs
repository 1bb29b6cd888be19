//! The condition registry: one static table driving implication
//! expansion, conflict detection, type applicability, and default
//! handler selection.
//!
//! Both the implication expander and the graph builder consult this
//! table, so the two can never disagree about what implies what.

/// Metadata for one known condition.
#[derive(Debug, Clone, Copy)]
pub struct ConditionMeta {
    pub name: &'static str,
    /// Resource types this condition applies to.
    pub applicable_types: &'static [&'static str],
    /// Conditions that must hold first.
    pub implies: &'static [&'static str],
    /// Conditions that cannot coexist on the same subject.
    pub conflicts: &'static [&'static str],
    /// Handler used when the statement names none.
    pub default_handler: &'static str,
}

/// The built-in condition table.
pub const CONDITIONS: &[ConditionMeta] = &[
    // Filesystem
    ConditionMeta {
        name: "exists",
        applicable_types: &["file", "directory"],
        implies: &[],
        conflicts: &[],
        default_handler: "fs.native",
    },
    ConditionMeta {
        name: "readable",
        applicable_types: &["file"],
        implies: &["exists"],
        conflicts: &[],
        default_handler: "fs.native",
    },
    ConditionMeta {
        name: "writable",
        applicable_types: &["file"],
        implies: &["exists"],
        conflicts: &[],
        default_handler: "fs.native",
    },
    ConditionMeta {
        name: "encrypted",
        applicable_types: &["file"],
        implies: &["exists", "readable", "writable"],
        conflicts: &["unencrypted"],
        default_handler: "AES:256",
    },
    ConditionMeta {
        name: "unencrypted",
        applicable_types: &["file"],
        implies: &["exists"],
        conflicts: &["encrypted"],
        default_handler: "",
    },
    ConditionMeta {
        name: "permissions",
        applicable_types: &["file", "directory"],
        implies: &["exists"],
        conflicts: &[],
        default_handler: "posix",
    },
    ConditionMeta {
        name: "checksum",
        applicable_types: &["file"],
        implies: &["exists", "readable"],
        conflicts: &[],
        default_handler: "fs.native",
    },
    ConditionMeta {
        name: "content",
        applicable_types: &["file"],
        implies: &["exists"],
        conflicts: &[],
        default_handler: "fs.native",
    },
    // Processes and services
    ConditionMeta {
        name: "running",
        applicable_types: &["process", "service"],
        implies: &[],
        conflicts: &["stopped"],
        default_handler: "process.native",
    },
    ConditionMeta {
        name: "stopped",
        applicable_types: &["process", "service"],
        implies: &[],
        conflicts: &["running"],
        default_handler: "process.native",
    },
    ConditionMeta {
        name: "listening",
        applicable_types: &["service"],
        implies: &["running"],
        conflicts: &[],
        default_handler: "service.native",
    },
    ConditionMeta {
        name: "healthy",
        applicable_types: &["service"],
        implies: &["running"],
        conflicts: &[],
        default_handler: "service.native",
    },
    // HTTP
    ConditionMeta {
        name: "reachable",
        applicable_types: &["http"],
        implies: &[],
        conflicts: &[],
        default_handler: "http.get",
    },
    ConditionMeta {
        name: "status_code",
        applicable_types: &["http"],
        implies: &["reachable"],
        conflicts: &[],
        default_handler: "http.get",
    },
    ConditionMeta {
        name: "tls",
        applicable_types: &["http"],
        implies: &["reachable"],
        conflicts: &[],
        default_handler: "http.get",
    },
    // Scheduling
    ConditionMeta {
        name: "scheduled",
        applicable_types: &["cron"],
        implies: &[],
        conflicts: &[],
        default_handler: "cron.native",
    },
    // Backup and database
    ConditionMeta {
        name: "backed_up",
        applicable_types: &["file", "database"],
        implies: &["exists"],
        conflicts: &[],
        default_handler: "backup.native",
    },
    ConditionMeta {
        name: "stable",
        applicable_types: &["database"],
        implies: &[],
        conflicts: &[],
        default_handler: "db.native",
    },
];

/// Look up a condition by name; `None` for unknown conditions, which
/// pass through the pipeline untouched.
pub fn lookup(name: &str) -> Option<&'static ConditionMeta> {
    CONDITIONS.iter().find(|meta| meta.name == name)
}

/// The default handler for a condition; empty for unknown conditions
/// and conditions without one.
pub fn default_handler(condition: &str) -> &'static str {
    lookup(condition).map_or("", |meta| meta.default_handler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_conditions() {
        let encrypted = lookup("encrypted").unwrap();
        assert_eq!(encrypted.implies, &["exists", "readable", "writable"]);
        assert_eq!(encrypted.conflicts, &["unencrypted"]);
        assert_eq!(encrypted.default_handler, "AES:256");

        let exists = lookup("exists").unwrap();
        assert!(exists.implies.is_empty());

        assert!(lookup("no_such_condition").is_none());
    }

    #[test]
    fn conflicts_are_symmetric() {
        for meta in CONDITIONS {
            for conflict in meta.conflicts {
                let other = lookup(conflict).unwrap_or_else(|| {
                    panic!("{} conflicts with unknown condition {}", meta.name, conflict)
                });
                assert!(
                    other.conflicts.contains(&meta.name),
                    "{} -> {} conflict is one-way",
                    meta.name,
                    conflict
                );
            }
        }
    }

    #[test]
    fn implied_conditions_are_known() {
        for meta in CONDITIONS {
            for implied in meta.implies {
                assert!(lookup(implied).is_some(), "{} implies unknown {}", meta.name, implied);
            }
        }
    }

    #[test]
    fn default_handler_lookup() {
        assert_eq!(default_handler("permissions"), "posix");
        assert_eq!(default_handler("reachable"), "http.get");
        assert_eq!(default_handler("no_such_condition"), "");
    }
}
