//! Category bookkeeping and path-segment sanitising.
//!
//! A [`CategorySet`] maps the lower-cased form of every category to one
//! display form, so `"study"` from the model lands in the caller's `"Study"`
//! folder instead of creating a sibling. Labels proposed
//! by the model are untrusted: they become directory names, so every label is
//! reduced to a single safe path segment before it is looked up or stored.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Default cap on the number of categories in one batch.
pub const DEFAULT_MAX_CATEGORIES: usize = 64;

/// Default cap on the length (in chars) of a category name.
pub const DEFAULT_MAX_LABEL_CHARS: usize = 64;

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Characters that are unsafe in a directory or file name on any platform.
fn is_reserved(c: char) -> bool {
    matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control()
}

/// Reduce arbitrary text to one safe path segment.
///
/// Reserved characters become `_`, whitespace runs collapse to one space,
/// leading dots are removed (no `.`, `..` or hidden entries) and the result
/// is truncated to `max_chars`. May return an empty string.
pub fn sanitize_segment(raw: &str, max_chars: usize) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| if c != ' ' && c.is_whitespace() { ' ' } else { c })
        .map(|c| if is_reserved(c) { '_' } else { c })
        .collect();
    let collapsed = RE_WHITESPACE.replace_all(replaced.trim(), " ");
    let stripped = collapsed.trim_start_matches('.').trim();
    stripped
        .chars()
        .take(max_chars)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Turn raw model output into a category name.
///
/// Models sometimes answer `"**Study**."` or add a second line of
/// explanation despite the prompt. Only the first non-empty line survives,
/// minus quotes or emphasis wrapped around the whole label and one
/// sentence-final period. `A.I.` and `'90s` are kept as written.
pub fn clean_label(raw: &str, max_chars: usize) -> String {
    let mut label = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    loop {
        let next = unwrap_decoration(strip_final_period(label));
        if next == label {
            break;
        }
        label = next;
    }
    sanitize_segment(label, max_chars)
}

/// Remove one pair of matching quote or emphasis marks around `label`.
fn unwrap_decoration(label: &str) -> &str {
    const PAIRS: [(char, char); 6] = [
        ('"', '"'),
        ('\'', '\''),
        ('`', '`'),
        ('*', '*'),
        ('“', '”'),
        ('‘', '’'),
    ];
    PAIRS
        .iter()
        .find_map(|&(open, close)| label.strip_prefix(open)?.strip_suffix(close))
        .map(str::trim)
        .unwrap_or(label)
}

/// Drop a trailing period unless the label has other periods (`A.I.`).
fn strip_final_period(label: &str) -> &str {
    match label.strip_suffix('.') {
        Some(head) if !head.contains('.') => head.trim_end(),
        _ => label,
    }
}

/// Reduce an uploaded file name to a safe name inside a category folder.
///
/// Only the final path component is kept. Returns `None` when nothing
/// usable is left.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let last = raw.rsplit(&['/', '\\'][..]).next().unwrap_or(raw);
    let name = sanitize_segment(last, 255);
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Outcome of matching a predicted label against a [`CategorySet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Canonical folder name the file goes to.
    pub name: String,
    /// The label was not known before this call.
    pub is_new: bool,
    /// The label was unusable or over the cap and was replaced by the fallback.
    pub fell_back: bool,
}

/// Ordered, case-insensitive set of category names.
#[derive(Debug, Clone)]
pub struct CategorySet {
    names: Vec<String>,
    by_key: HashMap<String, usize>,
    introduced: Vec<String>,
    max_categories: usize,
    max_label_chars: usize,
}

impl Default for CategorySet {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CATEGORIES, DEFAULT_MAX_LABEL_CHARS)
    }
}

impl CategorySet {
    pub fn new(max_categories: usize, max_label_chars: usize) -> Self {
        Self {
            names: Vec::new(),
            by_key: HashMap::new(),
            introduced: Vec::new(),
            max_categories: max_categories.max(1),
            max_label_chars: max_label_chars.max(1),
        }
    }

    /// Build a set from caller-supplied names with default limits.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        set.seed(names);
        set
    }

    /// Add caller-supplied names. Blank names are skipped. When two names
    /// differ only in case, the later spelling replaces the earlier one but
    /// keeps its position. Caller names are never refused by the cap.
    pub fn seed<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for raw in names {
            let name = sanitize_segment(raw.as_ref(), self.max_label_chars);
            if name.is_empty() {
                continue;
            }
            match self.by_key.get(&name.to_lowercase()) {
                Some(&i) => self.names[i] = name,
                None => self.push(name),
            }
        }
    }

    /// Display names in insertion order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Names added by [`CategorySet::resolve`] rather than by the caller.
    pub fn introduced(&self) -> &[String] {
        &self.introduced
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Canonical display form of `label`, matched case-insensitively.
    pub fn canonical(&self, label: &str) -> Option<&str> {
        self.by_key
            .get(&label.to_lowercase())
            .map(|&i| self.names[i].as_str())
    }

    /// Map a predicted label onto a folder name, growing the set when the
    /// label is new.
    ///
    /// `fallback` is used when the cleaned label is empty or the set is
    /// full; the fallback itself is always admitted.
    pub fn resolve(&mut self, predicted: &str, fallback: &str) -> Resolution {
        let label = clean_label(predicted, self.max_label_chars);
        let fallback = {
            let f = sanitize_segment(fallback, self.max_label_chars);
            if f.is_empty() {
                "Other".to_string()
            } else {
                f
            }
        };

        if label.is_empty() {
            return self.admit(fallback, true);
        }
        if let Some(existing) = self.canonical(&label) {
            return Resolution {
                name: existing.to_string(),
                is_new: false,
                fell_back: false,
            };
        }
        if self.names.len() < self.max_categories {
            return self.admit(label, false);
        }
        self.admit(fallback, true)
    }

    fn admit(&mut self, name: String, fell_back: bool) -> Resolution {
        if let Some(existing) = self.canonical(&name) {
            return Resolution {
                name: existing.to_string(),
                is_new: false,
                fell_back,
            };
        }
        self.push(name.clone());
        self.introduced.push(name.clone());
        Resolution {
            name,
            is_new: true,
            fell_back,
        }
    }

    fn push(&mut self, name: String) {
        let key = name.to_lowercase();
        if self.by_key.contains_key(&key) {
            return;
        }
        self.by_key.insert(key, self.names.len());
        self.names.push(name);
    }
}
