//! INI-style configuration file parsing
//!
//! The cluster configuration uses a minimal INI dialect:
//!
//! ```text
//! # comment
//! [section]
//! key = value
//! key: value
//! ```
//!
//! Keys are case-sensitive. Lines before the first section header, lines
//! without a separator, and unterminated section headers are ignored. A
//! repeated key overwrites the earlier value.

use std::collections::BTreeMap;

/// Parsed INI document (section → key → value)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl IniDocument {
    /// Parse INI text
    pub fn parse(contents: &str) -> Self {
        let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut current_section = String::new();

        for line in contents.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            if let Some(rest) = trimmed.strip_prefix('[') {
                if let Some(end) = rest.find(']') {
                    current_section = rest[..end].trim().to_string();
                }
                continue;
            }

            // '=' wins over ':' so values such as "host:port" survive
            let sep = match trimmed.find('=').or_else(|| trimmed.find(':')) {
                Some(sep) => sep,
                None => continue,
            };

            let key = trimmed[..sep].trim();
            let value = trimmed[sep + 1..].trim();

            if !current_section.is_empty() && !key.is_empty() {
                sections
                    .entry(current_section.clone())
                    .or_default()
                    .insert(key.to_string(), value.to_string());
            }
        }

        Self { sections }
    }

    /// Raw value lookup
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    /// String value, or `default` if the key is absent
    pub fn get_string(&self, section: &str, key: &str, default: &str) -> String {
        self.get(section, key).unwrap_or(default).to_string()
    }

    /// Non-empty string value
    pub fn get_non_empty(&self, section: &str, key: &str) -> Option<String> {
        self.get(section, key)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Integer value; empty or malformed values yield `None`
    pub fn get_int(&self, section: &str, key: &str) -> Option<i64> {
        self.get(section, key).and_then(|v| v.parse::<i64>().ok())
    }

    /// Boolean value (`true`, `yes` or `1`); empty values yield `default`
    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        match self.get(section, key) {
            None | Some("") => default,
            Some(v) => matches!(v, "true" | "yes" | "1"),
        }
    }

    /// All key/value pairs of a section, in key order
    pub fn section(&self, section: &str) -> impl Iterator<Item = (&str, &str)> {
        self.sections
            .get(section)
            .into_iter()
            .flat_map(|s| s.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

/// Split a comma-separated list into trimmed, non-empty tokens
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sections_and_comments() {
        let doc = IniDocument::parse(
            "# top comment\n\
             orphan = ignored\n\
             [cluster]\n\
             master = m0\n\
             \n\
             # another\n\
             workers: w1, w2\n\
             [paths]\n\
             cuclark_dir =   /opt/arda  \n",
        );

        assert_eq!(doc.get("cluster", "master"), Some("m0"));
        assert_eq!(doc.get("cluster", "workers"), Some("w1, w2"));
        assert_eq!(doc.get("paths", "cuclark_dir"), Some("/opt/arda"));
        assert_eq!(doc.get("", "orphan"), None);
    }

    #[test]
    fn test_keys_are_case_sensitive() {
        let doc = IniDocument::parse("[cluster]\nMaster = m0\n");
        assert_eq!(doc.get("cluster", "master"), None);
        assert_eq!(doc.get("cluster", "Master"), Some("m0"));
    }

    #[test]
    fn test_equals_preferred_over_colon() {
        let doc = IniDocument::parse("[options]\ncoordinator = m0:4000\n");
        assert_eq!(doc.get("options", "coordinator"), Some("m0:4000"));
    }

    #[test]
    fn test_unterminated_header_is_ignored() {
        let doc = IniDocument::parse("[cluster]\n[broken\nmaster = m0\n");
        assert_eq!(doc.get("cluster", "master"), Some("m0"));
    }

    #[test]
    fn test_typed_getters() {
        let doc = IniDocument::parse(
            "[classification]\n\
             kmer_size = 27\n\
             batch_size = lots\n\
             tsk = yes\n\
             gzipped = no\n\
             extended =\n",
        );

        assert_eq!(doc.get_int("classification", "kmer_size"), Some(27));
        assert_eq!(doc.get_int("classification", "batch_size"), None);
        assert_eq!(doc.get_int("classification", "missing"), None);
        assert!(doc.get_bool("classification", "tsk", false));
        assert!(!doc.get_bool("classification", "gzipped", true));
        assert!(doc.get_bool("classification", "extended", true));
        assert_eq!(doc.get_non_empty("classification", "extended"), None);
    }

    #[test]
    fn test_section_iteration() {
        let doc = IniDocument::parse("[reads]\nw2 = b.fq\nw1 = a.fq\n");
        let entries: Vec<_> = doc.section("reads").collect();
        assert_eq!(entries, vec![("w1", "a.fq"), ("w2", "b.fq")]);
        assert_eq!(doc.section("missing").count(), 0);
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" a.fq , ,b.fq,"), vec!["a.fq", "b.fq"]);
        assert!(split_list("").is_empty());
    }
}
