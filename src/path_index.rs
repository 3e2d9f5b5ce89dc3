//! Torrent-relative path trie: maps POSIX-style paths to file entries and
//! byte ranges to piece ranges.
//!
//! Built once at torrent-ready time (spec.md §3 "PathIndex"). An arena of
//! nodes indexed by integer id avoids owning-pointer cycles for the tree
//! (spec.md §9 "Path index graph") and keeps lookup/listing at O(depth) /
//! O(children).

use crate::error::{Result, TorrentFsError};
use std::collections::BTreeMap;

/// A single file's position within a torrent's concatenated storage.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    /// POSIX-style path, `/`-separated, no leading slash.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Byte offset of this file within the torrent's concatenated storage.
    pub offset: u64,
    /// Index of the piece containing the first byte of this file.
    pub first_piece: u32,
    /// Index of the piece containing the last byte of this file.
    pub last_piece: u32,
    /// Byte offset of `offset` within `first_piece`.
    pub offset_in_first_piece: u64,
    /// Byte offset of the file's last byte within `last_piece`.
    pub offset_in_last_piece: u64,
}

/// The kind of a path index entry, for listing and `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
}

/// One child entry as returned by `list`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
}

/// Result of a `stat` call.
#[derive(Debug, Clone, PartialEq)]
pub struct StatEntry {
    pub kind: EntryKind,
    pub size: u64,
}

/// Result of a `lookup` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    File(FileEntry),
    Dir { size: u64 },
}

#[derive(Debug)]
enum NodeKind {
    Dir,
    File(FileEntry),
}

#[derive(Debug)]
struct Node {
    name: String,
    kind: NodeKind,
    // Stable lexicographic child order falls out of BTreeMap for free.
    children: BTreeMap<String, usize>,
}

/// Split and validate a torrent-relative path per spec.md §4.2.
///
/// Collapses `//`, rejects `.`/`..` segments and absolute paths. Returns the
/// path's components; an empty path yields an empty vector (the root).
pub fn normalize(path: &str) -> Result<Vec<String>> {
    if path.starts_with('/') {
        return Err(TorrentFsError::PathUnsafe(path.to_string()));
    }
    let mut parts = Vec::new();
    for seg in path.split('/') {
        if seg.is_empty() {
            continue;
        }
        if seg == "." || seg == ".." {
            return Err(TorrentFsError::PathUnsafe(path.to_string()));
        }
        parts.push(seg.to_string());
    }
    Ok(parts)
}

/// Trie mapping torrent-relative paths to file entries.
pub struct PathIndex {
    nodes: Vec<Node>,
    piece_length: u64,
    num_pieces: u32,
}

impl PathIndex {
    /// Build a path index from a torrent's file list (in torrent order) and
    /// its piece geometry. File offsets are computed by concatenation in
    /// list order, matching how a BitTorrent session lays out multi-file
    /// storage.
    pub fn build(files: &[(String, u64)], piece_length: u64, num_pieces: u32) -> Result<Self> {
        let mut index = PathIndex {
            nodes: vec![Node {
                name: String::new(),
                kind: NodeKind::Dir,
                children: BTreeMap::new(),
            }],
            piece_length,
            num_pieces,
        };

        let mut offset = 0u64;
        for (path, size) in files {
            let parts = normalize(path)?;
            if parts.is_empty() {
                return Err(TorrentFsError::PathUnsafe(path.clone()));
            }
            let entry = index.make_entry(path.clone(), *size, offset);
            index.insert(&parts, entry)?;
            offset += *size;
        }
        Ok(index)
    }

    fn make_entry(&self, path: String, size: u64, offset: u64) -> FileEntry {
        let (first_piece, offset_in_first_piece) = self.piece_for_offset(offset);
        let last_byte = if size == 0 { offset } else { offset + size - 1 };
        let (last_piece, offset_in_last_piece) = self.piece_for_offset(last_byte);
        FileEntry {
            path,
            size,
            offset,
            first_piece,
            last_piece,
            offset_in_first_piece,
            offset_in_last_piece,
        }
    }

    fn piece_for_offset(&self, offset: u64) -> (u32, u64) {
        if self.piece_length == 0 {
            return (0, 0);
        }
        let piece = (offset / self.piece_length) as u32;
        let piece = piece.min(self.num_pieces.saturating_sub(1));
        (piece, offset % self.piece_length)
    }

    fn insert(&mut self, parts: &[String], entry: FileEntry) -> Result<()> {
        let mut current = 0usize;
        for (depth, part) in parts.iter().enumerate() {
            let is_leaf = depth == parts.len() - 1;
            if let Some(&child_idx) = self.nodes[current].children.get(part) {
                if is_leaf {
                    // Duplicate path in the file list: last write wins, matching
                    // how a trie insertion naturally behaves.
                    self.nodes[child_idx].kind = NodeKind::File(entry.clone());
                } else if matches!(self.nodes[child_idx].kind, NodeKind::File(_)) {
                    return Err(TorrentFsError::PathUnsafe(entry.path.clone()));
                }
                current = child_idx;
            } else {
                let kind = if is_leaf {
                    NodeKind::File(entry.clone())
                } else {
                    NodeKind::Dir
                };
                let new_idx = self.nodes.len();
                self.nodes.push(Node {
                    name: part.clone(),
                    kind,
                    children: BTreeMap::new(),
                });
                self.nodes[current].children.insert(part.clone(), new_idx);
                current = new_idx;
            }
        }
        Ok(())
    }

    fn resolve(&self, parts: &[String]) -> Option<usize> {
        let mut current = 0usize;
        for part in parts {
            current = *self.nodes[current].children.get(part)?;
        }
        Some(current)
    }

    fn dir_size(&self, idx: usize) -> u64 {
        self.nodes[idx]
            .children
            .values()
            .map(|&c| match &self.nodes[c].kind {
                NodeKind::File(entry) => entry.size,
                NodeKind::Dir => self.dir_size(c),
            })
            .sum()
    }

    /// Exact match lookup (spec.md §4.2 `lookup`).
    pub fn lookup(&self, path: &str) -> Result<Lookup> {
        let parts = normalize(path)?;
        let idx = self
            .resolve(&parts)
            .ok_or_else(|| TorrentFsError::FileNotFound(path.to_string()))?;
        match &self.nodes[idx].kind {
            NodeKind::File(entry) => Ok(Lookup::File(entry.clone())),
            NodeKind::Dir => Ok(Lookup::Dir {
                size: self.dir_size(idx),
            }),
        }
    }

    /// List the direct children of a directory, in stable lexicographic order.
    pub fn list(&self, path: &str) -> Result<Vec<ChildEntry>> {
        let parts = normalize(path)?;
        let idx = self
            .resolve(&parts)
            .ok_or_else(|| TorrentFsError::FileNotFound(path.to_string()))?;
        if matches!(self.nodes[idx].kind, NodeKind::File(_)) {
            return Err(TorrentFsError::NotADirectory(path.to_string()));
        }
        Ok(self.nodes[idx]
            .children
            .iter()
            .map(|(name, &child)| match &self.nodes[child].kind {
                NodeKind::File(entry) => ChildEntry {
                    name: name.clone(),
                    kind: EntryKind::File,
                    size: entry.size,
                },
                NodeKind::Dir => ChildEntry {
                    name: name.clone(),
                    kind: EntryKind::Dir,
                    size: self.dir_size(child),
                },
            })
            .collect())
    }

    /// Metadata for a file or directory (spec.md §4.2 `stat`).
    pub fn stat(&self, path: &str) -> Result<StatEntry> {
        match self.lookup(path)? {
            Lookup::File(entry) => Ok(StatEntry {
                kind: EntryKind::File,
                size: entry.size,
            }),
            Lookup::Dir { size } => Ok(StatEntry {
                kind: EntryKind::Dir,
                size,
            }),
        }
    }

    /// Look up a file entry, distinguishing `IsADirectory` from `FileNotFound`.
    pub fn file_entry(&self, path: &str) -> Result<FileEntry> {
        match self.lookup(path)? {
            Lookup::File(entry) => Ok(entry),
            Lookup::Dir { .. } => Err(TorrentFsError::IsADirectory(path.to_string())),
        }
    }

    /// Resolve a byte range within a file to a piece range (spec.md §4.2
    /// `pieces_for`). Returns `(p0, p1, offset_in_p0)`.
    pub fn pieces_for(&self, file: &FileEntry, offset: u64, length: u64) -> (u32, u32, u64) {
        let start = file.offset + offset;
        let end = if length == 0 {
            start
        } else {
            start + length - 1
        };
        let (p0, off_in_p0) = self.piece_for_offset(start);
        let (p1, _) = self.piece_for_offset(end);
        (p0, p1, off_in_p0)
    }

    /// Enumerate every file under `path` (the whole torrent if `path` is the
    /// root), stopping the descent once `max_dirs` directories have been
    /// visited (`0` means unlimited). Used by `pin-dir`/`unpin-dir` and
    /// directory-argument `prefetch` (spec.md §4.4, §4.5).
    pub fn files_under(&self, path: &str, max_dirs: u32) -> Result<Vec<FileEntry>> {
        let parts = normalize(path)?;
        let idx = self
            .resolve(&parts)
            .ok_or_else(|| TorrentFsError::FileNotFound(path.to_string()))?;
        let mut files = Vec::new();
        let mut dirs_visited = 0u32;
        self.collect_files(idx, max_dirs, &mut dirs_visited, &mut files);
        Ok(files)
    }

    fn collect_files(&self, idx: usize, max_dirs: u32, dirs_visited: &mut u32, out: &mut Vec<FileEntry>) {
        match &self.nodes[idx].kind {
            NodeKind::File(entry) => out.push(entry.clone()),
            NodeKind::Dir => {
                if max_dirs > 0 && *dirs_visited >= max_dirs {
                    return;
                }
                *dirs_visited += 1;
                for &child in self.nodes[idx].children.values() {
                    self.collect_files(child, max_dirs, dirs_visited, out);
                }
            }
        }
    }

    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    pub fn num_pieces(&self) -> u32 {
        self.num_pieces
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PathIndex {
        PathIndex::build(
            &[
                ("a/b.txt".to_string(), 10),
                ("a/c.bin".to_string(), 100),
                ("d.md".to_string(), 5),
            ],
            16,
            10,
        )
        .unwrap()
    }

    #[test]
    fn list_root_matches_scenario_1() {
        let idx = sample();
        let entries = idx.list("").unwrap();
        assert_eq!(
            entries,
            vec![
                ChildEntry {
                    name: "a".to_string(),
                    kind: EntryKind::Dir,
                    size: 110,
                },
                ChildEntry {
                    name: "d.md".to_string(),
                    kind: EntryKind::File,
                    size: 5,
                },
            ]
        );
    }

    #[test]
    fn lookup_resolves_same_entry_as_list() {
        let idx = sample();
        let entries = idx.list("a").unwrap();
        for child in entries {
            let full = format!("a/{}", child.name);
            match idx.lookup(&full).unwrap() {
                Lookup::File(entry) => assert_eq!(entry.path, full),
                Lookup::Dir { .. } => panic!("unexpected dir"),
            }
        }
    }

    #[test]
    fn rejects_unsafe_paths() {
        let idx = sample();
        assert!(matches!(
            idx.lookup("../etc/passwd"),
            Err(TorrentFsError::PathUnsafe(_))
        ));
        assert!(matches!(idx.lookup("/a/b.txt"), Err(TorrentFsError::PathUnsafe(_))));
    }

    #[test]
    fn distinguishes_not_a_directory_from_is_a_directory() {
        let idx = sample();
        assert!(matches!(
            idx.list("d.md"),
            Err(TorrentFsError::NotADirectory(_))
        ));
        assert!(matches!(
            idx.file_entry("a"),
            Err(TorrentFsError::IsADirectory(_))
        ));
    }

    #[test]
    fn collapses_double_slashes() {
        let idx = sample();
        assert_eq!(idx.lookup("a//b.txt").unwrap(), idx.lookup("a/b.txt").unwrap());
    }

    #[test]
    fn files_under_enumerates_a_subtree() {
        let idx = sample();
        let mut paths: Vec<String> = idx.files_under("a", 0).unwrap().into_iter().map(|f| f.path).collect();
        paths.sort();
        assert_eq!(paths, vec!["a/b.txt".to_string(), "a/c.bin".to_string()]);

        let mut all: Vec<String> = idx.files_under("", 0).unwrap().into_iter().map(|f| f.path).collect();
        all.sort();
        assert_eq!(all, vec!["a/b.txt".to_string(), "a/c.bin".to_string(), "d.md".to_string()]);
    }

    #[test]
    fn files_under_respects_max_dirs() {
        let idx = sample();
        // Only the root directory itself is allowed: descending into "a" is cut off.
        let files = idx.files_under("", 1).unwrap();
        assert_eq!(files, vec![idx.file_entry("d.md").unwrap()]);
    }

    #[test]
    fn pieces_for_spans_correctly() {
        let idx = sample();
        let file = idx.file_entry("a/c.bin").unwrap();
        // a/b.txt occupies bytes [0,10), a/c.bin occupies [10,110).
        let (p0, p1, off) = idx.pieces_for(&file, 0, 100);
        assert_eq!(p0, 10 / 16);
        assert_eq!(off, 10 % 16);
        assert_eq!(p1, (109) / 16);
    }
}
