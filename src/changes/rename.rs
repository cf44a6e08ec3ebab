//! Pattern-based file renames.
//!
//! A rename pattern pair such as `*.txt` → `*.md` or `img_??.png` →
//! `pic_??.png` moves every matching file, carrying the text captured by
//! each wildcard over to the corresponding wildcard of the target.

use crate::error::{Result, StoreError};
use crate::glob::fnmatch;
use std::collections::BTreeSet;

/// One block of a tokenized glob pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GlobToken {
    Literal(String),
    /// `*`, a run of `?`, or a `[...]` set.
    Wildcard(String),
}

/// Split a glob pattern into literal text and wildcard blocks.
///
/// Bracketed escapes (`[?]`, `[*]`, `[[]`, `[]]`) are literal characters.
pub fn tokenize(pattern: &str) -> Vec<GlobToken> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '[' && i + 2 < chars.len() && chars[i + 2] == ']' && "?*[]".contains(chars[i + 1]) {
            literal.push(chars[i + 1]);
            i += 3;
            continue;
        }
        let wildcard = match c {
            '*' => {
                i += 1;
                Some("*".to_string())
            }
            '?' => {
                let start = i;
                while i < chars.len() && chars[i] == '?' {
                    i += 1;
                }
                Some(chars[start..i].iter().collect())
            }
            '[' => match chars[i + 1..].iter().position(|&ch| ch == ']') {
                Some(offset) => {
                    let end = i + 1 + offset + 1;
                    let set: String = chars[i..end].iter().collect();
                    i = end;
                    Some(set)
                }
                None => None,
            },
            _ => None,
        };
        match wildcard {
            Some(block) => {
                if !literal.is_empty() {
                    tokens.push(GlobToken::Literal(std::mem::take(&mut literal)));
                }
                tokens.push(GlobToken::Wildcard(block));
            }
            None => {
                literal.push(c);
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        tokens.push(GlobToken::Literal(literal));
    }
    tokens
}

fn wildcards(tokens: &[GlobToken]) -> impl Iterator<Item = &str> {
    tokens.iter().filter_map(|t| match t {
        GlobToken::Wildcard(w) => Some(w.as_str()),
        GlobToken::Literal(_) => None,
    })
}

/// Translation of file names from a source glob to a target glob.
#[derive(Clone, Debug)]
pub struct RenamePattern {
    source: Vec<GlobToken>,
    target: Vec<GlobToken>,
}

impl RenamePattern {
    /// The target may use fewer wildcards than the source, but each one it
    /// uses must be the same kind as the source wildcard at that position.
    pub fn new(source: &str, target: &str) -> Result<Self> {
        let source_tokens = tokenize(source);
        let target_tokens = tokenize(target);
        let source_wild: Vec<_> = wildcards(&source_tokens).collect();
        let target_wild: Vec<_> = wildcards(&target_tokens).collect();

        if source_wild.len() < target_wild.len() {
            return Err(StoreError::InvalidPattern(format!(
                "'{}' has more wildcards than '{}'",
                target, source
            )));
        }
        if source_wild.iter().zip(&target_wild).any(|(s, t)| s != t) {
            return Err(StoreError::InvalidPattern(format!(
                "wildcards of '{}' and '{}' differ",
                source, target
            )));
        }
        Ok(Self {
            source: source_tokens,
            target: target_tokens,
        })
    }

    /// Target name for `name`, or `None` if it does not match the source.
    pub fn translate(&self, name: &str) -> Option<String> {
        let mut captures = Vec::new();
        if !capture(&self.source, name, &mut captures) {
            return None;
        }
        let mut captures = captures.into_iter();
        let mut out = String::new();
        for token in &self.target {
            match token {
                GlobToken::Literal(text) => out.push_str(text),
                GlobToken::Wildcard(_) => out.push_str(&captures.next()?),
            }
        }
        Some(out)
    }
}

fn capture(tokens: &[GlobToken], name: &str, captures: &mut Vec<String>) -> bool {
    let Some((first, rest)) = tokens.split_first() else {
        return name.is_empty();
    };
    match first {
        GlobToken::Literal(text) => match name.strip_prefix(text.as_str()) {
            Some(remaining) => capture(rest, remaining, captures),
            None => false,
        },
        GlobToken::Wildcard(w) if w == "*" => {
            let mut ends: Vec<usize> = name.char_indices().map(|(i, _)| i).collect();
            ends.push(name.len());
            for end in ends {
                captures.push(name[..end].to_string());
                if capture(rest, &name[end..], captures) {
                    return true;
                }
                captures.pop();
            }
            false
        }
        GlobToken::Wildcard(w) => {
            let width = if w.starts_with('?') { w.len() } else { 1 };
            let Some((end, _)) = name.char_indices().chain([(name.len(), ' ')]).nth(width) else {
                return false;
            };
            let taken = &name[..end];
            if w.starts_with('[') && !fnmatch(w, taken) {
                return false;
            }
            captures.push(taken.to_string());
            if capture(rest, &name[end..], captures) {
                return true;
            }
            captures.pop();
            false
        }
    }
}

/// Order rename actions so no file is renamed onto a name that is still
/// waiting to be renamed away.
///
/// Fails on duplicate targets and on cyclic renames.
pub fn reorder_renames(actions: Vec<(String, String)>) -> Result<Vec<(String, String)>> {
    let mut targets = BTreeSet::new();
    for (_, target) in &actions {
        if !targets.insert(target.as_str()) {
            return Err(StoreError::InvalidPattern(format!(
                "several files would be renamed to '{}'",
                target
            )));
        }
    }

    let mut pending = actions;
    let mut ordered = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let sources: BTreeSet<String> = pending
            .iter()
            .filter(|(s, t)| s != t)
            .map(|(s, _)| s.clone())
            .collect();
        let (ready, blocked): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|(s, t)| s == t || !sources.contains(t));
        if ready.is_empty() {
            return Err(StoreError::InvalidOperation(format!(
                "cyclic rename involving '{}'",
                blocked[0].0
            )));
        }
        ordered.extend(ready);
        pending = blocked;
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("img_??[0-9]*.png"),
            vec![
                GlobToken::Literal("img_".into()),
                GlobToken::Wildcard("??".into()),
                GlobToken::Wildcard("[0-9]".into()),
                GlobToken::Wildcard("*".into()),
                GlobToken::Literal(".png".into()),
            ]
        );
        assert_eq!(tokenize("a[*]b"), vec![GlobToken::Literal("a*b".into())]);
    }

    #[test]
    fn test_translate_carries_captures() {
        let rename = RenamePattern::new("*.txt", "*.md").unwrap();
        assert_eq!(rename.translate("notes.txt").as_deref(), Some("notes.md"));
        assert_eq!(rename.translate("notes.rs"), None);

        let rename = RenamePattern::new("img_??_*.png", "pic??-*.png").unwrap();
        assert_eq!(
            rename.translate("img_01_cat.png").as_deref(),
            Some("pic01-cat.png")
        );

        let rename = RenamePattern::new("v[0-9].*", "version[0-9].*").unwrap();
        assert_eq!(rename.translate("v3.txt").as_deref(), Some("version3.txt"));
        assert_eq!(rename.translate("vx.txt"), None);
    }

    #[test]
    fn test_incompatible_patterns() {
        assert!(RenamePattern::new("*.txt", "*-*.txt").is_err());
        assert!(RenamePattern::new("?.txt", "*.txt").is_err());
        assert!(RenamePattern::new("*_*.txt", "*.txt").is_ok());
    }

    #[test]
    fn test_reorder_renames() {
        let ordered = reorder_renames(vec![
            ("a1".into(), "a2".into()),
            ("a2".into(), "a3".into()),
        ])
        .unwrap();
        assert_eq!(ordered[0].0, "a2");
        assert_eq!(ordered[1].0, "a1");

        assert!(reorder_renames(vec![("a".into(), "b".into()), ("b".into(), "a".into())]).is_err());
        assert!(reorder_renames(vec![("a".into(), "c".into()), ("b".into(), "c".into())]).is_err());
    }
}
