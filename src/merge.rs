//! Line-level diff and merge of text files.

use crate::error::Result;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Which side's changes an update replicates.
///
/// Bit 1 brings in what the other side added, bit 2 drops what the other
/// side no longer has, `Ask` defers each decision to a resolver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MergeOperation {
    Insert = 1,
    Remove = 2,
    #[default]
    Both = 3,
    Ask = 4,
}

impl MergeOperation {
    pub fn inserts(self) -> bool {
        (self as u8) & 1 != 0
    }

    pub fn removes(self) -> bool {
        (self as u8) & 2 != 0
    }

    pub fn asks(self) -> bool {
        matches!(self, MergeOperation::Ask)
    }
}

impl fmt::Display for MergeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergeOperation::Insert => "insert",
            MergeOperation::Remove => "remove",
            MergeOperation::Both => "both",
            MergeOperation::Ask => "ask",
        };
        f.write_str(name)
    }
}

/// Decision for a whole conflicting file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileChoice {
    Mine,
    Theirs,
    /// Merge line by line (text files only).
    Merge,
}

/// Decision for one differing block of lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineChoice {
    Mine,
    Theirs,
    Both,
}

/// Source of decisions for conflicts the merge policy leaves open.
pub trait ConflictResolver {
    fn resolve_file(&mut self, path: &str, binary: bool) -> Result<FileChoice>;

    fn resolve_lines(&mut self, path: &str, mine: &[String], theirs: &[String])
        -> Result<LineChoice>;
}

/// Non-interactive resolver that always keeps the working tree's version.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeepMine;

impl ConflictResolver for KeepMine {
    fn resolve_file(&mut self, _path: &str, _binary: bool) -> Result<FileChoice> {
        Ok(FileChoice::Mine)
    }

    fn resolve_lines(&mut self, _path: &str, _mine: &[String], _theirs: &[String]) -> Result<LineChoice> {
        Ok(LineChoice::Mine)
    }
}

/// Line ending convention of a text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum NewlineStyle {
    #[default]
    Lf,
    CrLf,
    Cr,
}

impl NewlineStyle {
    pub fn detect(text: &str) -> Self {
        if text.contains("\r\n") {
            NewlineStyle::CrLf
        } else if text.contains('\r') {
            NewlineStyle::Cr
        } else {
            NewlineStyle::Lf
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NewlineStyle::Lf => "\n",
            NewlineStyle::CrLf => "\r\n",
            NewlineStyle::Cr => "\r",
        }
    }
}

/// Split text into lines without their terminators.
pub fn split_lines(text: &str) -> Vec<String> {
    let style = NewlineStyle::detect(text);
    let mut lines: Vec<String> = text.split(style.as_str()).map(str::to_string).collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

/// Kind of a diff block, from the old text's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Keep,
    Insert,
    Remove,
    Replace,
}

/// A run of lines with the same diff status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeBlock {
    pub kind: BlockKind,
    /// Zero-based line index in the old text.
    pub old_line: usize,
    /// Zero-based line index in the new text.
    pub new_line: usize,
    /// Lines of the new text (old text for `Keep` and `Remove`).
    pub lines: Vec<String>,
    /// Old lines replaced by `lines` (only for `Replace`).
    pub replaces: Vec<String>,
}

fn comparable(line: &str, ignore_whitespace: bool) -> String {
    if ignore_whitespace {
        line.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        line.to_string()
    }
}

/// Diff two line sequences into blocks.
///
/// Common prefix and suffix are matched directly; the middle part is aligned
/// with Hirschberg's divide and conquer, which keeps memory linear in the
/// length of the texts.
pub fn diff_blocks(old: &[String], new: &[String], ignore_whitespace: bool) -> Vec<MergeBlock> {
    // Lines are interned so the alignment compares integers
    let mut ids: HashMap<String, u32> = HashMap::new();
    let mut intern = |line: &String| {
        let next = ids.len() as u32;
        *ids.entry(comparable(line, ignore_whitespace)).or_insert(next)
    };
    let a: Vec<u32> = old.iter().map(&mut intern).collect();
    let b: Vec<u32> = new.iter().map(&mut intern).collect();

    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let (a_mid, b_mid) = (&a[prefix..a.len() - suffix], &b[prefix..b.len() - suffix]);
    let (n, m) = (a_mid.len(), b_mid.len());

    // One op per line: Keep(i, j), Remove(i), Insert(j), in absolute indices.
    let mut ops: Vec<(BlockKind, usize, usize)> = (0..prefix).map(|k| (BlockKind::Keep, k, k)).collect();
    let shared: HashSet<u32> = a_mid.iter().copied().collect();
    if b_mid.iter().any(|id| shared.contains(id)) {
        align(a_mid, b_mid, prefix, prefix, &mut ops);
    } else {
        // Nothing in common: one replaced block
        ops.extend((0..n).map(|k| (BlockKind::Remove, prefix + k, prefix)));
        ops.extend((0..m).map(|k| (BlockKind::Insert, prefix + n, prefix + k)));
    }
    for k in 0..suffix {
        ops.push((BlockKind::Keep, prefix + n + k, prefix + m + k));
    }

    let mut blocks: Vec<MergeBlock> = Vec::new();
    for (kind, oi, ni) in ops {
        let (line, target) = match kind {
            BlockKind::Insert => (new[ni].clone(), kind),
            _ => (old[oi].clone(), kind),
        };
        match blocks.last_mut() {
            Some(last) if last.kind == target => last.lines.push(line),
            Some(last) if last.kind == BlockKind::Remove && target == BlockKind::Insert => {
                last.kind = BlockKind::Replace;
                last.replaces = std::mem::take(&mut last.lines);
                last.lines.push(line);
                last.new_line = ni;
            }
            Some(last) if last.kind == BlockKind::Replace && target == BlockKind::Insert => {
                last.lines.push(line);
            }
            _ => blocks.push(MergeBlock {
                kind: target,
                old_line: oi,
                new_line: ni,
                lines: vec![line],
                replaces: Vec::new(),
            }),
        }
    }
    blocks
}

/// LCS lengths of `a` against every prefix of `b`, one row at a time.
fn lcs_row<'a>(a: impl Iterator<Item = &'a u32>, b: &[u32]) -> Vec<u32> {
    let mut prev = vec![0u32; b.len() + 1];
    let mut cur = vec![0u32; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            cur[j + 1] = if x == y { prev[j] + 1 } else { prev[j + 1].max(cur[j]) };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev
}

fn align(a: &[u32], b: &[u32], i: usize, j: usize, ops: &mut Vec<(BlockKind, usize, usize)>) {
    if a.is_empty() {
        ops.extend((0..b.len()).map(|k| (BlockKind::Insert, i, j + k)));
        return;
    }
    if b.is_empty() {
        ops.extend((0..a.len()).map(|k| (BlockKind::Remove, i + k, j)));
        return;
    }
    if a.len() == 1 {
        match b.iter().position(|&y| y == a[0]) {
            Some(k) => {
                ops.extend((0..k).map(|t| (BlockKind::Insert, i, j + t)));
                ops.push((BlockKind::Keep, i, j + k));
                ops.extend((k + 1..b.len()).map(|t| (BlockKind::Insert, i + 1, j + t)));
            }
            None => {
                ops.push((BlockKind::Remove, i, j));
                ops.extend((0..b.len()).map(|t| (BlockKind::Insert, i + 1, j + t)));
            }
        }
        return;
    }

    let mid = a.len() / 2;
    let forward = lcs_row(a[..mid].iter(), b);
    let reversed: Vec<u32> = b.iter().rev().copied().collect();
    let backward = lcs_row(a[mid..].iter().rev(), &reversed);
    let split = (0..=b.len())
        .max_by_key(|&k| (forward[k] + backward[b.len() - k], std::cmp::Reverse(k)))
        .unwrap_or(0);

    align(&a[..mid], &b[..split], i, j, ops);
    align(&a[mid..], &b[split..], i + mid, j + split, ops);
}

/// Merge `theirs` into `mine` line by line.
///
/// Lines only `theirs` has are taken if `op` inserts; lines only `mine` has
/// are dropped if `op` removes. A replaced block becomes theirs for
/// `Both`, mine followed by theirs for `Insert` and is dropped for `Remove`.
/// `Ask` defers every differing block to `resolver`. The result uses the
/// newline style of `mine` (of `theirs` if `mine` is empty).
pub fn merge_lines(
    path: &str,
    theirs: &str,
    mine: &str,
    op: MergeOperation,
    resolver: &mut dyn ConflictResolver,
) -> Result<(String, NewlineStyle)> {
    let style = if mine.is_empty() {
        NewlineStyle::detect(theirs)
    } else {
        NewlineStyle::detect(mine)
    };
    let mine_lines = split_lines(mine);
    let theirs_lines = split_lines(theirs);

    let mut output: Vec<String> = Vec::new();
    for block in diff_blocks(&mine_lines, &theirs_lines, false) {
        match block.kind {
            BlockKind::Keep => output.extend(block.lines),
            BlockKind::Insert => {
                let take = if op.asks() {
                    resolver.resolve_lines(path, &[], &block.lines)? != LineChoice::Mine
                } else {
                    op.inserts()
                };
                if take {
                    output.extend(block.lines);
                }
            }
            BlockKind::Remove => {
                let keep = if op.asks() {
                    resolver.resolve_lines(path, &block.lines, &[])? != LineChoice::Theirs
                } else {
                    !op.removes()
                };
                if keep {
                    output.extend(block.lines);
                }
            }
            BlockKind::Replace => match op {
                MergeOperation::Both => output.extend(block.lines),
                MergeOperation::Insert => {
                    output.extend(block.replaces);
                    output.extend(block.lines);
                }
                MergeOperation::Remove => {}
                MergeOperation::Ask => {
                    match resolver.resolve_lines(path, &block.replaces, &block.lines)? {
                        LineChoice::Mine => output.extend(block.replaces),
                        LineChoice::Theirs => output.extend(block.lines),
                        LineChoice::Both => {
                            output.extend(block.replaces);
                            output.extend(block.lines);
                        }
                    }
                }
            },
        }
    }

    let eol = style.as_str();
    let mut merged = output.join(eol);
    let trailing = if mine.is_empty() { theirs } else { mine };
    if !output.is_empty() && (trailing.ends_with('\n') || trailing.ends_with('\r')) {
        merged.push_str(eol);
    }
    Ok((merged, style))
}
