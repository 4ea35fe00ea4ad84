//! Text helpers: edit distance, fuzzy scoring, glob matching and selector heuristics.

use crate::category::ElementCategory;
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use std::sync::OnceLock;

/// Classic Levenshtein distance (insert, delete, substitute all cost 1) over chars.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Case-insensitive similarity in `[0, 1]`.
///
/// - 1.0 for an exact match
/// - `0.7 + 0.3 * shorter/longer` when one contains the other
/// - otherwise `1 - distance / longer`
///
/// An empty string against a non-empty one scores 0.
pub fn fuzzy_score(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();

    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let len_a = a.chars().count();
    let len_b = b.chars().count();
    let (shorter, longer) = (len_a.min(len_b) as f64, len_a.max(len_b) as f64);

    if a.contains(&b) || b.contains(&a) {
        return 0.7 + 0.3 * (shorter / longer);
    }

    (1.0 - edit_distance(&a, &b) as f64 / longer).clamp(0.0, 1.0)
}

/// Redis-style glob match: `*`, `?`, `[abc]`, `[a-z]`, `[^a]` and `\` escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(&pattern, p, text[t]) {
                        if matched {
                            p = next;
                            t += 1;
                            continue;
                        }
                    } else if text[t] == '[' {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
                '\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c if c == text[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }
        }

        match backtrack {
            Some((star, consumed)) => {
                p = star + 1;
                t = consumed + 1;
                backtrack = Some((star, consumed + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

/// Match `c` against the bracket class starting at `pattern[start] == '['`.
///
/// Returns `(matched, index after ']')`, or `None` for an unterminated class.
fn match_class(pattern: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < pattern.len() {
        let current = pattern[i];
        if current == ']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;

        let (lo, step) = if current == '\\' && i + 1 < pattern.len() {
            (pattern[i + 1], 2)
        } else {
            (current, 1)
        };

        if pattern.get(i + step) == Some(&'-') && i + step + 1 < pattern.len() {
            let hi = pattern[i + step + 1];
            if hi != ']' {
                if lo <= c && c <= hi {
                    matched = true;
                }
                i += step + 2;
                continue;
            }
        }

        if lo == c {
            matched = true;
        }
        i += step;
    }

    None
}

/// Quote a string as an XPath 1.0 literal.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{}'", value)
    } else if !value.contains('"') {
        format!("\"{}\"", value)
    } else {
        let parts: Vec<String> = value.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// Whether `value` is shaped like an identifier token rather than free text.
///
/// Identifier tokens have no whitespace, only `[A-Za-z0-9_.:/-]`, and are not
/// a single title-cased word such as `Login`.
pub fn looks_like_identifier(value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() {
        return false;
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '/' | '-'))
    {
        return false;
    }

    let mut chars = value.chars();
    let title_case_word = chars.next().is_some_and(|c| c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_lowercase());

    !title_case_word
}

/// Kind of "hub" element whose resolution warrants prefetching neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubKind {
    /// Form input: neighbouring inputs and the submit button are likely next.
    FormField,
    /// Button: sibling buttons.
    Button,
    /// List row: the other rows.
    ListItem,
}

const HUB_KEYWORDS: &[(&str, HubKind)] = &[
    ("field", HubKind::FormField),
    ("input", HubKind::FormField),
    ("textbox", HubKind::FormField),
    ("email", HubKind::FormField),
    ("password", HubKind::FormField),
    ("username", HubKind::FormField),
    ("search", HubKind::FormField),
    ("button", HubKind::Button),
    ("btn", HubKind::Button),
    ("submit", HubKind::Button),
    ("cell", HubKind::ListItem),
    ("item", HubKind::ListItem),
    ("row", HubKind::ListItem),
    ("list", HubKind::ListItem),
];

fn hub_matcher() -> Option<&'static AhoCorasick> {
    static MATCHER: OnceLock<Option<AhoCorasick>> = OnceLock::new();
    MATCHER
        .get_or_init(|| {
            AhoCorasickBuilder::new()
                .ascii_case_insensitive(true)
                .match_kind(MatchKind::LeftmostFirst)
                .build(HUB_KEYWORDS.iter().map(|(keyword, _)| keyword))
                .ok()
        })
        .as_ref()
}

impl HubKind {
    /// Detect a hub from selector keywords. The leftmost keyword wins.
    pub fn detect(selector: &str) -> Option<Self> {
        let matcher = hub_matcher()?;
        matcher
            .find(selector)
            .map(|m| HUB_KEYWORDS[m.pattern().as_usize()].1)
    }

    /// Categories worth prefetching after resolving a hub of this kind.
    pub fn related_categories(&self) -> &'static [ElementCategory] {
        match self {
            Self::FormField => &[
                ElementCategory::TextField,
                ElementCategory::SecureTextField,
                ElementCategory::Button,
            ],
            Self::Button => &[ElementCategory::Button],
            Self::ListItem => &[ElementCategory::Cell],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("", ""), 0);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("flaw", "lawn"), 2);
    }

    #[test]
    fn test_fuzzy_score_boundaries() {
        assert_eq!(fuzzy_score("login", "login"), 1.0);
        assert_eq!(fuzzy_score("Login", "LOGIN"), 1.0);
        assert!(fuzzy_score("log", "login") > 0.7);
        assert!((fuzzy_score("log", "login") - 0.88).abs() < 1e-9);
        assert!(fuzzy_score("login", "register") < 0.5);
        assert_eq!(fuzzy_score("", "x"), 0.0);
        assert_eq!(fuzzy_score("x", ""), 0.0);
    }

    #[test]
    fn test_fuzzy_score_edit_distance_branch() {
        // one substitution over five chars
        assert!((fuzzy_score("login", "logon") - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("accessibility id:*", "accessibility id:login_button"));
        assert!(glob_match("*login*", "xpath://*[@label='login']"));
        assert!(!glob_match("id:*", "accessibility id:login"));
        assert!(glob_match("h?llo", "hello"));
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("h[a-c]llo", "hbllo"));
        assert!(glob_match("a\\*b", "a*b"));
        assert!(!glob_match("a\\*b", "axb"));
        assert!(glob_match("", ""));
        assert!(!glob_match("", "x"));
    }

    #[test]
    fn test_xpath_literal() {
        assert_eq!(xpath_literal("Login"), "'Login'");
        assert_eq!(xpath_literal("Don't"), "\"Don't\"");
        assert_eq!(
            xpath_literal("say \"don't\""),
            "concat('say \"don', \"'\", 't\"')"
        );
    }

    #[test]
    fn test_looks_like_identifier() {
        assert!(looks_like_identifier("login_button"));
        assert!(looks_like_identifier("loginButton"));
        assert!(looks_like_identifier("com.app:id/login"));
        assert!(!looks_like_identifier("Sign In"));
        assert!(!looks_like_identifier("Login"));
        assert!(!looks_like_identifier(""));
        assert!(!looks_like_identifier("¿Qué?"));
    }

    #[test]
    fn test_hub_detection() {
        assert_eq!(HubKind::detect("email_field"), Some(HubKind::FormField));
        assert_eq!(HubKind::detect("LoginButton"), Some(HubKind::Button));
        assert_eq!(HubKind::detect("settings_row_3"), Some(HubKind::ListItem));
        assert_eq!(HubKind::detect("logo"), None);
    }
}
