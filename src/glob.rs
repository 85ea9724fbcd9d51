// Shared glob -> regex compiler used by every backend's listing filter.
//
// Supported characters: `*` (any run) and `?` (single char). No character
// classes, no brace expansion. The match is anchored at both ends of the
// name and is case-insensitive.

use regex::{escape, Regex};

/// A compiled listing filter.
///
/// An empty pattern or `"*"` matches every name.
#[derive(Debug, Clone)]
pub struct Glob {
    regex: Regex,
}

impl Glob {
    /// Compiles `pattern` into a name-anchored, case-insensitive matcher.
    pub fn compile(pattern: &str) -> Glob {
        let pattern = if pattern.is_empty() { "*" } else { pattern };

        let mut re = String::with_capacity(pattern.len() * 2 + 8);
        re.push_str("(?i)^");
        for c in pattern.chars() {
            match c {
                '*' => re.push_str(".*"),
                '?' => re.push('.'),
                other => re.push_str(&escape(&other.to_string())),
            }
        }
        re.push('$');

        // The pattern is built entirely from escaped literals plus `.*`/`.`,
        // so compilation cannot fail.
        let regex = Regex::new(&re).expect("glob pattern compiles to a valid regex");
        Glob { regex }
    }

    /// True iff `name` matches this glob.
    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_everything() {
        let g = Glob::compile("*");
        assert!(g.is_match("anything.txt"));
        assert!(g.is_match(""));
    }

    #[test]
    fn empty_matches_everything() {
        let g = Glob::compile("");
        assert!(g.is_match("anything.txt"));
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        let g = Glob::compile("*.txt");
        assert!(g.is_match("a.txt"));
        assert!(g.is_match("A.TXT"));
        assert!(!g.is_match("a.md"));
    }

    #[test]
    fn question_mark_matches_single_char() {
        let g = Glob::compile("a?.txt");
        assert!(g.is_match("ab.txt"));
        assert!(!g.is_match("abc.txt"));
        assert!(!g.is_match("a.txt"));
    }

    #[test]
    fn literal_dots_are_escaped() {
        let g = Glob::compile("a.txt");
        assert!(g.is_match("a.txt"));
        assert!(!g.is_match("aXtxt"));
    }
}
