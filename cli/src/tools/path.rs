//! Resolves a tool's `path` argument to a location under the workspace root,
//! rejecting escapes.

use std::path::{Component, Path, PathBuf};

use adnify_core::tool_source::ToolSourceError;

fn normalize(path: &Path) -> PathBuf {
    let mut buf = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(p) => buf = PathBuf::from(p.as_os_str()),
            Component::RootDir => buf.push(comp),
            Component::CurDir => {}
            Component::ParentDir => {
                buf.pop();
            }
            Component::Normal(s) => buf.push(s),
        }
    }
    buf
}

pub fn resolve_under(workspace_root: &Path, path_param: &str) -> Result<PathBuf, ToolSourceError> {
    let path_param = path_param.trim();
    let path_param = if path_param.is_empty() { "." } else { path_param };
    let joined = if Path::new(path_param).is_absolute() {
        PathBuf::from(path_param)
    } else {
        workspace_root.join(path_param)
    };
    let normalized = normalize(&joined);
    let root_normalized = normalize(workspace_root);
    if !normalized.starts_with(&root_normalized) {
        return Err(ToolSourceError::InvalidArguments(format!(
            "path escapes workspace root: {path_param}"
        )));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_resolves_under_root() {
        let root = Path::new("/workspace");
        let resolved = resolve_under(root, "notes/a.txt").unwrap();
        assert_eq!(resolved, PathBuf::from("/workspace/notes/a.txt"));
    }

    #[test]
    fn parent_traversal_outside_root_is_rejected() {
        let root = Path::new("/workspace/project");
        let err = resolve_under(root, "../../etc/passwd").unwrap_err();
        assert!(matches!(err, ToolSourceError::InvalidArguments(_)));
    }

    #[test]
    fn empty_path_resolves_to_root() {
        let root = Path::new("/workspace");
        let resolved = resolve_under(root, "").unwrap();
        assert_eq!(resolved, PathBuf::from("/workspace"));
    }
}
