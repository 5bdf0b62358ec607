//! Wildcard patterns for the `like` operator.

use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternElem {
    Char(char),
    Wildcard,
}

/// A `like` pattern: literal characters and `*` wildcards. A literal star
/// is written `\*` in policy text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern(Vec<PatternElem>);

impl Pattern {
    pub fn new(elems: Vec<PatternElem>) -> Self {
        Self(elems)
    }

    pub fn elems(&self) -> &[PatternElem] {
        &self.0
    }

    /// Greedy two-pointer match with backtracking to the last wildcard.
    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        let pat = &self.0;
        let (mut t, mut p) = (0usize, 0usize);
        let mut star: Option<(usize, usize)> = None;

        while t < text.len() {
            match pat.get(p) {
                Some(PatternElem::Char(c)) if *c == text[t] => {
                    t += 1;
                    p += 1;
                }
                Some(PatternElem::Wildcard) => {
                    star = Some((p, t));
                    p += 1;
                }
                _ => match star {
                    Some((star_p, star_t)) => {
                        p = star_p + 1;
                        t = star_t + 1;
                        star = Some((star_p, star_t + 1));
                    }
                    None => return false,
                },
            }
        }
        pat[p..].iter().all(|e| *e == PatternElem::Wildcard)
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("\"")?;
        for elem in &self.0 {
            match elem {
                PatternElem::Wildcard => f.write_str("*")?,
                PatternElem::Char('*') => f.write_str("\\*")?,
                PatternElem::Char(c) => write!(f, "{}", c.escape_debug())?,
            }
        }
        f.write_str("\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn pattern(text: &str) -> Pattern {
        let mut elems = Vec::new();
        let mut chars = text.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => elems.push(PatternElem::Char(chars.next().unwrap())),
                '*' => elems.push(PatternElem::Wildcard),
                c => elems.push(PatternElem::Char(c)),
            }
        }
        Pattern::new(elems)
    }

    #[parameterized(
        prefix = { "web*", "web-01.example.com", true },
        prefix_miss = { "web*", "abc.example.com", false },
        suffix = { "*.example.com", "web.example.com", true },
        infix = { "a*c*e", "abcde", true },
        infix_miss = { "a*c*e", "abcdf", false },
        exact = { "abc", "abc", true },
        exact_longer_text = { "abc", "abcd", false },
        only_star = { "*", "", true },
        escaped_star = { r"a\*b", "a*b", true },
        escaped_star_is_literal = { r"a\*b", "axb", false },
        backtracking = { "*ab", "aab", true },
    )]
    fn test_pattern_matches(pat: &str, text: &str, expected: bool) {
        assert_eq!(pattern(pat).matches(text), expected);
    }

    #[test]
    fn test_pattern_display_escapes_literal_star() {
        assert_eq!(pattern(r"a\**").to_string(), r#""a\**""#);
    }
}
