use crate::error::ProvisionError;

/// Parent container for folder and file operations. Remote platforms take
/// different request parameters for project roots versus nested folders, so
/// the distinction is carried explicitly instead of inferred at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Project(String),
    Folder(String),
}

impl Scope {
    pub fn id(&self) -> &str {
        match self {
            Scope::Project(id) => id,
            Scope::Folder(id) => id,
        }
    }
}

/// Splits a project-relative POSIX-style path into directory segments and a
/// file name.
pub fn split_project_path(path: &str) -> Result<(Vec<String>, String), ProvisionError> {
    let mut segments: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .map(str::to_string)
        .collect();
    if segments.iter().any(|segment| segment == "..") {
        return Err(ProvisionError::InvalidPath(path.to_string()));
    }
    let Some(file_name) = segments.pop() else {
        return Err(ProvisionError::InvalidPath(path.to_string()));
    };
    Ok((segments, file_name))
}

/// Resolves a chain of folder names under the given root, creating missing
/// segments one level at a time. Each resolved folder becomes the parent for
/// the next segment; the returned scope is the immediate parent for the
/// target file. Failures abort mid-chain without rollback, since folders
/// created so far are reusable on retry.
pub fn resolve_path<F>(
    segments: &[String],
    root: Scope,
    mut ensure_folder: F,
) -> Result<Scope, ProvisionError>
where
    F: FnMut(&str, &Scope) -> Result<String, ProvisionError>,
{
    let mut parent = root;
    for segment in segments {
        let folder_id = ensure_folder(segment, &parent)?;
        parent = Scope::Folder(folder_id);
    }
    Ok(parent)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn split_nested_path() {
        let (dirs, name) = split_project_path("outputs/rnaseq/sample.bam").unwrap();
        assert_eq!(dirs, vec!["outputs", "rnaseq"]);
        assert_eq!(name, "sample.bam");
    }

    #[test]
    fn split_bare_file_name() {
        let (dirs, name) = split_project_path("sample.bam").unwrap();
        assert!(dirs.is_empty());
        assert_eq!(name, "sample.bam");
    }

    #[test]
    fn split_absolute_style_path() {
        let (dirs, name) = split_project_path("/outputs/sample.bam").unwrap();
        assert_eq!(dirs, vec!["outputs"]);
        assert_eq!(name, "sample.bam");
    }

    #[test]
    fn split_rejects_empty_and_parent_traversal() {
        assert_matches!(split_project_path(""), Err(ProvisionError::InvalidPath(_)));
        assert_matches!(split_project_path("/"), Err(ProvisionError::InvalidPath(_)));
        assert_matches!(
            split_project_path("a/../b.txt"),
            Err(ProvisionError::InvalidPath(_))
        );
    }

    #[test]
    fn resolves_segments_in_order() {
        let mut seen = Vec::new();
        let leaf = resolve_path(
            &["a".to_string(), "b".to_string(), "c".to_string()],
            Scope::Project("proj".to_string()),
            |name, parent| {
                seen.push((name.to_string(), parent.id().to_string()));
                Ok(format!("{}/{}", parent.id(), name))
            },
        )
        .unwrap();
        assert_eq!(leaf, Scope::Folder("proj/a/b/c".to_string()));
        assert_eq!(
            seen,
            vec![
                ("a".to_string(), "proj".to_string()),
                ("b".to_string(), "proj/a".to_string()),
                ("c".to_string(), "proj/a/b".to_string()),
            ]
        );
    }

    #[test]
    fn empty_segments_return_root() {
        let leaf = resolve_path(&[], Scope::Project("proj".to_string()), |_, _| {
            panic!("no folder should be resolved")
        })
        .unwrap();
        assert_eq!(leaf, Scope::Project("proj".to_string()));
    }

    #[test]
    fn repeated_resolution_creates_each_folder_once() {
        // Simulated remote folder store keyed by (parent, name).
        let mut folders: BTreeMap<(String, String), String> = BTreeMap::new();
        let mut creations = 0usize;
        let segments = vec!["a".to_string(), "b".to_string()];
        let mut resolve = |folders: &mut BTreeMap<(String, String), String>,
                           creations: &mut usize| {
            resolve_path(
                &segments,
                Scope::Project("proj".to_string()),
                |name, parent| {
                    let key = (parent.id().to_string(), name.to_string());
                    let id = folders.entry(key).or_insert_with(|| {
                        *creations += 1;
                        format!("{}/{}", parent.id(), name)
                    });
                    Ok(id.clone())
                },
            )
        };
        let first = resolve(&mut folders, &mut creations).unwrap();
        let second = resolve(&mut folders, &mut creations).unwrap();
        assert_eq!(first, second);
        assert_eq!(creations, 2);
    }

    #[test]
    fn aborts_on_intermediate_failure() {
        let err = resolve_path(
            &["a".to_string(), "b".to_string()],
            Scope::Project("proj".to_string()),
            |name, _| {
                if name == "b" {
                    Err(ProvisionError::AmbiguousMatch {
                        kind: "folder",
                        name: name.to_string(),
                        count: 2,
                    })
                } else {
                    Ok("proj/a".to_string())
                }
            },
        )
        .unwrap_err();
        assert_matches!(err, ProvisionError::AmbiguousMatch { .. });
    }
}
