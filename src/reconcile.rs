use std::collections::HashSet;
use std::hash::Hash;

use crate::error::ProvisionError;

/// Removes duplicate elements; element order is not preserved.
pub fn dedup<T: Eq + Hash>(values: Vec<T>) -> Vec<T> {
    values
        .into_iter()
        .collect::<HashSet<T>>()
        .into_iter()
        .collect()
}

/// Gets a single resource or creates it if missing.
///
/// The three-outcome contract: an empty collection triggers the create call
/// followed by a verifying lookup, exactly one match is returned as-is, and
/// more than one match is refused. The verifying lookup guards against a
/// concurrent creator or a silently failed create; it must converge to
/// exactly one match.
pub fn get_or_create<T, G, C>(
    kind: &'static str,
    name: &str,
    mut get: G,
    create: C,
) -> Result<T, ProvisionError>
where
    G: FnMut() -> Result<Vec<T>, ProvisionError>,
    C: FnOnce() -> Result<(), ProvisionError>,
{
    let mut matches = get()?;
    match matches.len() {
        0 => {
            tracing::debug!(kind, name, "no match found; creating");
            create()?;
            let mut verified = get()?;
            match verified.len() {
                1 => Ok(verified.remove(0)),
                0 => Err(ProvisionError::Reconciliation {
                    kind,
                    name: name.to_string(),
                    found: 0,
                }),
                count => Err(ProvisionError::AmbiguousMatch {
                    kind,
                    name: name.to_string(),
                    count,
                }),
            }
        }
        1 => {
            tracing::debug!(kind, name, "found existing match");
            Ok(matches.remove(0))
        }
        count => Err(ProvisionError::AmbiguousMatch {
            kind,
            name: name.to_string(),
            count,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn dedup_removes_duplicates() {
        let mut result = dedup(vec!["A", "A", "B"]);
        result.sort();
        assert_eq!(result, vec!["A", "B"]);
    }

    #[test]
    fn dedup_empty() {
        let result: Vec<u32> = dedup(Vec::new());
        assert!(result.is_empty());
    }

    #[test]
    fn returns_existing_single_match() {
        let created = Cell::new(false);
        let result = get_or_create(
            "project",
            "test-project",
            || Ok(vec!["p1"]),
            || {
                created.set(true);
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(result, "p1");
        assert!(!created.get());
    }

    #[test]
    fn creates_when_missing() {
        let created = Cell::new(false);
        let result = get_or_create(
            "project",
            "test-project",
            || {
                if created.get() {
                    Ok(vec!["p1"])
                } else {
                    Ok(vec![])
                }
            },
            || {
                created.set(true);
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(result, "p1");
        assert!(created.get());
    }

    #[test]
    fn idempotent_on_replay() {
        // First call creates, second call finds the same resource.
        let store: Cell<Option<&str>> = Cell::new(None);
        let get = || Ok(store.get().into_iter().collect::<Vec<_>>());
        let create = || {
            store.set(Some("p1"));
            Ok(())
        };
        let first = get_or_create("project", "test-project", get, create).unwrap();
        let second = get_or_create("project", "test-project", get, || {
            panic!("should not create again")
        })
        .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn fails_when_create_does_not_converge() {
        let err = get_or_create::<&str, _, _>(
            "project",
            "test-project",
            || Ok(vec![]),
            || Ok(()),
        )
        .unwrap_err();
        assert_matches!(
            err,
            ProvisionError::Reconciliation {
                kind: "project",
                found: 0,
                ..
            }
        );
    }

    #[test]
    fn refuses_ambiguous_match_without_creating() {
        let created = Cell::new(false);
        let err = get_or_create(
            "folder",
            "data",
            || Ok(vec!["f1", "f2"]),
            || {
                created.set(true);
                Ok(())
            },
        )
        .unwrap_err();
        assert_matches!(err, ProvisionError::AmbiguousMatch { count: 2, .. });
        assert!(!created.get());
    }

    #[test]
    fn refuses_ambiguous_match_after_create() {
        let created = Cell::new(false);
        let err = get_or_create(
            "folder",
            "data",
            || {
                if created.get() {
                    Ok(vec!["f1", "f2", "f3"])
                } else {
                    Ok(vec![])
                }
            },
            || {
                created.set(true);
                Ok(())
            },
        )
        .unwrap_err();
        assert_matches!(err, ProvisionError::AmbiguousMatch { count: 3, .. });
    }

    #[test]
    fn propagates_create_failure() {
        let err = get_or_create::<&str, _, _>(
            "volume",
            "scratch",
            || Ok(vec![]),
            || {
                Err(ProvisionError::UnavailableResource {
                    kind: "volume",
                    id: "scratch".to_string(),
                    status: "must be provisioned out-of-band".to_string(),
                })
            },
        )
        .unwrap_err();
        assert_matches!(err, ProvisionError::UnavailableResource { .. });
    }
}
