//! Shell-style file name matching.
//!
//! Supports `*`, `?`, `[seq]`, `[!seq]` and character ranges (`[a-z]`).
//! Matching is case-sensitive and has no dotfile protection: ignore lists
//! such as `.*` rely on matching hidden names explicitly.

/// Match a glob pattern against a single file or directory name.
pub fn fnmatch(pattern: &str, name: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();

    let mut pi = 0;
    let mut ni = 0;
    // Position of the last `*` and the name index it is currently absorbing up to.
    let mut star: Option<(usize, usize)> = None;

    while ni < name.len() {
        if pi < pat.len() {
            match pat[pi] {
                '*' => {
                    star = Some((pi, ni));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ni += 1;
                    continue;
                }
                '[' => match match_class(&pat, pi, name[ni]) {
                    Some((true, next)) => {
                        pi = next;
                        ni += 1;
                        continue;
                    }
                    Some((false, _)) => {}
                    // Unterminated class: `[` is a literal.
                    None if name[ni] == '[' => {
                        pi += 1;
                        ni += 1;
                        continue;
                    }
                    None => {}
                },
                c if c == name[ni] => {
                    pi += 1;
                    ni += 1;
                    continue;
                }
                _ => {}
            }
        }

        match star {
            Some((star_pi, star_ni)) => {
                pi = star_pi + 1;
                ni = star_ni + 1;
                star = Some((star_pi, star_ni + 1));
            }
            None => return false,
        }
    }

    while pi < pat.len() && pat[pi] == '*' {
        pi += 1;
    }

    pi == pat.len()
}

/// Match `c` against the character class starting at `pat[start] == '['`.
///
/// Returns whether it matched and the index just past the closing `]`, or
/// `None` if the class is not terminated.
fn match_class(pat: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = i < pat.len() && pat[i] == '!';
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < pat.len() {
        if pat[i] == ']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;

        if i + 2 < pat.len() && pat[i + 1] == '-' && pat[i + 2] != ']' {
            if pat[i] <= c && c <= pat[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if pat[i] == c {
                matched = true;
            }
            i += 1;
        }
    }

    None
}

/// Match `name` against any of `patterns`.
pub fn matches_any<S: AsRef<str>>(patterns: &[S], name: &str) -> bool {
    patterns.iter().any(|p| fnmatch(p.as_ref(), name))
}

/// First pattern in `patterns` that matches `name`.
pub fn first_match<'p, S: AsRef<str>>(patterns: &'p [S], name: &str) -> Option<&'p str> {
    patterns
        .iter()
        .map(AsRef::as_ref)
        .find(|p| fnmatch(p, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star() {
        assert!(fnmatch("*", "hello"));
        assert!(fnmatch("*.txt", "hello.txt"));
        assert!(!fnmatch("*.txt", "hello.rs"));
        assert!(fnmatch("h*o", "hello"));
        assert!(fnmatch("*", ""));
    }

    #[test]
    fn test_question() {
        assert!(fnmatch("h?llo", "hello"));
        assert!(!fnmatch("h?llo", "hllo"));
    }

    #[test]
    fn test_classes() {
        assert!(fnmatch("*.py[cdo]", "mod.pyc"));
        assert!(fnmatch("*.py[cdo]", "mod.pyo"));
        assert!(!fnmatch("*.py[cdo]", "mod.py"));
        assert!(!fnmatch("*.py[cdo]", "mod.pyx"));
        assert!(fnmatch("file[0-9].txt", "file7.txt"));
        assert!(!fnmatch("file[!0-9].txt", "file7.txt"));
        assert!(fnmatch("file[!0-9].txt", "fileA.txt"));
    }

    #[test]
    fn test_literal_bracket() {
        assert!(fnmatch("a[b", "a[b"));
        assert!(fnmatch("[]]", "]"));
    }

    #[test]
    fn test_hidden_names_match_explicitly() {
        assert!(fnmatch(".*", ".git"));
        assert!(fnmatch("*", ".hidden"));
        assert!(!fnmatch(".*", "visible"));
    }

    #[test]
    fn test_first_match() {
        let patterns = vec!["*.bak".to_string(), "*.tmp".to_string()];
        assert_eq!(first_match(&patterns, "x.tmp"), Some("*.tmp"));
        assert_eq!(first_match(&patterns, "x.txt"), None);
        assert!(matches_any(&patterns, "y.bak"));
    }
}
