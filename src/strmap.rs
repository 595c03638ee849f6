//! String-to-string associative container used for headers (case-insensitive
//! lookup, case preserved on insert) and query parameters (case-sensitive).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Case {
    Sensitive,
    Insensitive,
}

#[derive(Debug, Clone)]
pub struct StrMap {
    entries: Vec<(String, String)>,
    case: Case,
}

impl StrMap {
    /// Case-insensitive map, used for request/response headers.
    pub fn headers() -> StrMap {
        StrMap {
            entries: Vec::new(),
            case: Case::Insensitive,
        }
    }

    /// Case-sensitive map, used for query parameters.
    pub fn query() -> StrMap {
        StrMap {
            entries: Vec::new(),
            case: Case::Sensitive,
        }
    }

    fn matches(&self, a: &str, b: &str) -> bool {
        match self.case {
            Case::Sensitive => a == b,
            Case::Insensitive => a.eq_ignore_ascii_case(b),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| self.matches(k, key))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Overwrites the value of the first matching entry, or appends a new one.
    pub fn set(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| {
            match self.case {
                Case::Sensitive => k == key,
                Case::Insensitive => k.eq_ignore_ascii_case(key),
            }
        }) {
            entry.1 = value.to_owned();
        } else {
            self.entries.push((key.to_owned(), value.to_owned()));
        }
    }

    /// Idempotent removal; no error if the key is absent.
    pub fn unset(&mut self, key: &str) {
        self.entries.retain(|(k, _)| !self.matches(k, key));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::StrMap;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut m = StrMap::headers();
        m.set("Content-Type", "text/plain");
        assert_eq!(m.get("content-type"), Some("text/plain"));
        assert_eq!(m.get("CONTENT-TYPE"), Some("text/plain"));
    }

    #[test]
    fn header_set_preserves_first_seen_casing() {
        let mut m = StrMap::headers();
        m.set("Host", "example.com");
        m.set("host", "example.org");
        assert_eq!(m.iter().collect::<Vec<_>>(), vec![("Host", "example.org")]);
    }

    #[test]
    fn query_lookup_is_case_sensitive() {
        let mut m = StrMap::query();
        m.set("Foo", "bar");
        assert_eq!(m.get("Foo"), Some("bar"));
        assert_eq!(m.get("foo"), None);
    }

    #[test]
    fn unset_is_idempotent() {
        let mut m = StrMap::headers();
        m.unset("missing");
        m.set("X", "1");
        m.unset("x");
        assert!(m.is_empty());
        m.unset("x");
        assert!(m.is_empty());
    }

    #[test]
    fn set_overwrites_duplicate_query_key() {
        let mut m = StrMap::query();
        m.set("a", "1");
        m.set("a", "2");
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("a"), Some("2"));
    }
}
