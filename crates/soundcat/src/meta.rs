//! Tag export shared by the format parsers.
//!
//! Each format exposes its free-text metadata as an ordered list of
//! `(label, value)` pairs. The order is fixed by the format (for example
//! NSFe always exports Name, Artist, Copyright, Ripper, ... in that order),
//! not by where the fields happened to sit in the file.

/// Ordered `(label, value)` metadata pairs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tags {
    entries: Vec<(String, String)>,
}

impl Tags {
    pub fn new() -> Self {
        Tags::default()
    }

    /// Append a pair. Labels are not deduplicated.
    pub fn push(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.entries.push((label.into(), value.into()));
    }

    /// Value of the first entry labelled `label`.
    pub fn get(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(l, v)| (l.as_str(), v.as_str()))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(l, _)| l.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for Tags {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Format a millisecond duration as `m:ss`.
///
/// Negative durations (NSFe uses -1 for "unknown") render as `0:00`.
pub fn format_duration_ms(ms: i64) -> String {
    let ms = ms.max(0);
    let minutes = ms / 60_000;
    let seconds = (ms - minutes * 60_000) / 1000;
    format!("{}:{:02}", minutes, seconds)
}

/// Join a list of names with `", "`, or `"(none)"` when empty.
pub(crate) fn join_names(names: &[String]) -> String {
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(format_duration_ms(0), "0:00");
        assert_eq!(format_duration_ms(65_432), "1:05");
        assert_eq!(format_duration_ms(600_000), "10:00");
        assert_eq!(format_duration_ms(-1), "0:00");
    }

    #[test]
    fn tags_keep_insertion_order() {
        let mut t = Tags::new();
        t.push("Name", "a");
        t.push("Artist", "b");
        t.push("Copyright", "c");
        assert_eq!(t.labels().collect::<Vec<_>>(), ["Name", "Artist", "Copyright"]);
        assert_eq!(t.get("Artist"), Some("b"));
        assert_eq!(t.get("Ripper"), None);
    }
}
