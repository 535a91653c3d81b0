//! Folder hierarchy and its flattening into slash-joined paths.

use crate::error::{Error, Result};

/// Deepest nesting [`resolve_paths`] descends into.
pub const MAX_FOLDER_DEPTH: usize = 64;

/// One mailbox as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    /// Full mailbox name.
    pub name: String,
    /// Hierarchy delimiter, `None` for a flat namespace.
    pub delimiter: Option<char>,
}

impl FolderEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(name: impl Into<String>, delimiter: Option<char>) -> Self {
        Self {
            name: name.into(),
            delimiter,
        }
    }
}

/// A folder and its children, keyed by name in listing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderNode {
    /// Child folders.
    pub children: Vec<(String, Self)>,
}

impl FolderNode {
    /// A folder without children.
    #[must_use]
    pub const fn leaf() -> Self {
        Self {
            children: Vec::new(),
        }
    }

    /// A folder with the given children.
    #[must_use]
    pub fn with_children<I, K>(children: I) -> Self
    where
        I: IntoIterator<Item = (K, Self)>,
        K: Into<String>,
    {
        Self {
            children: children
                .into_iter()
                .map(|(name, node)| (name.into(), node))
                .collect(),
        }
    }

    fn child_mut(&mut self, name: &str) -> &mut Self {
        let index = match self.children.iter().position(|(key, _)| key == name) {
            Some(index) => index,
            None => {
                self.children.push((name.to_string(), Self::leaf()));
                self.children.len() - 1
            }
        };
        &mut self.children[index].1
    }
}

/// Builds the folder tree from a flat listing.
///
/// Each name is split on its own delimiter. Intermediate folders that the
/// server did not list are created on the way.
#[must_use]
pub fn build_tree(entries: &[FolderEntry]) -> FolderNode {
    let mut root = FolderNode::default();
    for entry in entries {
        let segments: Vec<&str> = match entry.delimiter {
            Some(delimiter) => entry.name.split(delimiter).collect(),
            None => vec![entry.name.as_str()],
        };
        let mut node = &mut root;
        for segment in segments.into_iter().filter(|s| !s.is_empty()) {
            node = node.child_mut(segment);
        }
    }
    root
}

/// Flattens a tree into `/`-joined paths, one per leaf folder.
///
/// Folders with children contribute only through their descendants. Order
/// follows the children order at every level.
///
/// # Errors
///
/// Returns [`Error::FolderDepth`] when the tree nests deeper than
/// [`MAX_FOLDER_DEPTH`].
pub fn resolve_paths(root: &FolderNode) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    walk(&root.children, "", 1, &mut paths)?;
    Ok(paths)
}

fn walk(
    children: &[(String, FolderNode)],
    prefix: &str,
    depth: usize,
    paths: &mut Vec<String>,
) -> Result<()> {
    if depth > MAX_FOLDER_DEPTH {
        return Err(Error::FolderDepth(MAX_FOLDER_DEPTH));
    }
    for (name, node) in children {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        if node.children.is_empty() {
            paths.push(path);
        } else {
            walk(&node.children, &path, depth + 1, paths)?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_tree() {
        let tree = FolderNode::with_children([(
            "A",
            FolderNode::with_children([
                ("B", FolderNode::leaf()),
                ("C", FolderNode::with_children([("D", FolderNode::leaf())])),
            ]),
        )]);
        assert_eq!(resolve_paths(&tree).unwrap(), vec!["A/B", "A/C/D"]);
    }

    #[test]
    fn test_order_follows_listing() {
        let tree = FolderNode::with_children([
            ("INBOX", FolderNode::leaf()),
            ("Archive", FolderNode::leaf()),
            ("Drafts", FolderNode::leaf()),
        ]);
        assert_eq!(resolve_paths(&tree).unwrap(), vec!["INBOX", "Archive", "Drafts"]);
    }

    #[test]
    fn test_empty_tree() {
        assert!(resolve_paths(&FolderNode::default()).unwrap().is_empty());
    }

    #[test]
    fn test_build_tree_from_listing() {
        let entries = vec![
            FolderEntry::new("INBOX", Some('/')),
            FolderEntry::new("[Gmail]", Some('/')),
            FolderEntry::new("[Gmail]/Sent Mail", Some('/')),
            FolderEntry::new("[Gmail]/All Mail", Some('/')),
            FolderEntry::new("Work.Projects.2024", Some('.')),
        ];
        let tree = build_tree(&entries);
        assert_eq!(
            resolve_paths(&tree).unwrap(),
            vec![
                "INBOX",
                "[Gmail]/Sent Mail",
                "[Gmail]/All Mail",
                "Work/Projects/2024"
            ]
        );
    }

    #[test]
    fn test_depth_guard() {
        let mut tree = FolderNode::leaf();
        for level in 0..=MAX_FOLDER_DEPTH {
            tree = FolderNode::with_children([(format!("L{level}"), tree)]);
        }
        assert!(matches!(
            resolve_paths(&tree),
            Err(Error::FolderDepth(MAX_FOLDER_DEPTH))
        ));
    }

    #[test]
    fn test_depth_at_limit_allowed() {
        let mut tree = FolderNode::leaf();
        for level in 0..MAX_FOLDER_DEPTH {
            tree = FolderNode::with_children([(format!("L{level}"), tree)]);
        }
        let paths = resolve_paths(&tree).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].split('/').count(), MAX_FOLDER_DEPTH);
    }
}
