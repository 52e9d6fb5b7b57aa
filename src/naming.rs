//! # Archive Naming
//!
//! Backup identity lives entirely in the remote object name. Two templates, one
//! for full and one for differential archives, are used in both directions:
//! rendered to produce the destination of a new backup, and matched against
//! listing entries to recover id, kind and timestamps.
//!
//! ## Template syntax
//!
//! Literal text with `{name}` placeholders. `{{` and `}}` produce literal
//! braces. When matching, each placeholder captures the shortest non-empty
//! run of characters that lets the rest of the template match the whole input.
//!
//! ```text
//! {id}_full_{full_ts}_diff_{diff_ts}.tar.gz
//!   www_full_1700000000_diff_1700086400.tar.gz
//!   └id┘     └─full_ts──┘      └─diff_ts──┘
//! ```

use crate::config::Config;
use crate::error::ConfigError;
use crate::record::{BackupKind, BackupRecord};
use std::collections::BTreeMap;

pub const ID: &str = "id";
pub const FULL_TS: &str = "full_ts";
pub const DIFF_TS: &str = "diff_ts";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// A compiled naming template.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Compiles a template string, rejecting unbalanced braces and empty or
    /// non-identifier placeholder names.
    pub fn compile(source: &str) -> Result<Self, ConfigError> {
        let malformed = |message: String| ConfigError::Template {
            template: source.to_string(),
            message,
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) if ch.is_ascii_alphanumeric() || ch == '_' => name.push(ch),
                            Some(ch) => {
                                return Err(malformed(format!(
                                    "unexpected '{ch}' in placeholder name"
                                )))
                            }
                            None => return Err(malformed("unclosed '{'".to_string())),
                        }
                    }
                    if name.is_empty() {
                        return Err(malformed("empty placeholder".to_string()));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(name));
                }
                '}' => return Err(malformed("unmatched '}'".to_string())),
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Returns a copy of this template with literal text in front of it.
    pub fn prefixed(&self, prefix: &str) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        match self.segments.first() {
            Some(Segment::Literal(first)) => {
                segments.push(Segment::Literal(format!("{prefix}{first}")));
                segments.extend(self.segments[1..].iter().cloned());
            }
            _ => {
                if !prefix.is_empty() {
                    segments.push(Segment::Literal(prefix.to_string()));
                }
                segments.extend(self.segments.iter().cloned());
            }
        }
        let escaped = prefix.replace('{', "{{").replace('}', "}}");
        Self {
            source: format!("{escaped}{}", self.source),
            segments,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of appearance.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields().any(|f| f == name)
    }

    /// Literal text before the first placeholder.
    pub fn literal_prefix(&self) -> &str {
        match self.segments.first() {
            Some(Segment::Literal(text)) => text,
            _ => "",
        }
    }

    /// Substitutes every placeholder. Fails if any placeholder has no value.
    pub fn render(&self, values: &BTreeMap<&str, String>) -> Result<String, ConfigError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => {
                    let value =
                        values
                            .get(name.as_str())
                            .ok_or_else(|| ConfigError::MissingPlaceholder {
                                template: self.source.clone(),
                                name: name.clone(),
                            })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    /// Matches the whole input, returning the captured placeholder values.
    pub fn matches(&self, input: &str) -> Option<BTreeMap<String, String>> {
        let mut captures = Vec::new();
        if match_segments(&self.segments, input, &mut captures) {
            Some(captures.into_iter().collect())
        } else {
            None
        }
    }
}

fn match_segments(segments: &[Segment], input: &str, captures: &mut Vec<(String, String)>) -> bool {
    let Some((head, rest)) = segments.split_first() else {
        return input.is_empty();
    };

    match head {
        Segment::Literal(text) => input
            .strip_prefix(text.as_str())
            .is_some_and(|remaining| match_segments(rest, remaining, captures)),
        Segment::Field(name) => {
            let ends = input
                .char_indices()
                .map(|(i, _)| i)
                .skip(1)
                .chain(std::iter::once(input.len()));

            for end in ends {
                if end == 0 {
                    continue;
                }
                let candidate = &input[..end];

                // A repeated placeholder must capture the same text every time.
                let repeated = captures.iter().find(|(n, _)| n == name);
                if repeated.is_some_and(|(_, v)| v != candidate) {
                    continue;
                }

                captures.push((name.clone(), candidate.to_string()));
                if match_segments(rest, &input[end..], captures) {
                    return true;
                }
                captures.pop();
            }
            false
        }
    }
}

/// The pair of templates that name full and differential archives.
#[derive(Debug, Clone)]
pub struct NamingScheme {
    full: Template,
    diff: Template,
}

impl NamingScheme {
    /// Builds a scheme from the two template strings.
    ///
    /// Both templates need `{id}` and `{full_ts}`; the differential one also
    /// needs `{diff_ts}`. Any other placeholder is accepted for matching but
    /// cannot be rendered.
    pub fn new(full: &str, diff: &str) -> Result<Self, ConfigError> {
        let full = Template::compile(full)?;
        let diff = Template::compile(diff)?;

        require_fields(&full, "full_backup_name", &[ID, FULL_TS])?;
        require_fields(&diff, "diff_backup_name", &[ID, FULL_TS, DIFF_TS])?;

        Ok(Self { full, diff })
    }

    /// Builds the scheme for remote paths under the configured bucket.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let scheme = Self::new(&config.full_backup_name, &config.diff_backup_name)?;
        Ok(scheme.with_prefix(&config.remote_root()))
    }

    /// Prepends literal text (the remote root) to both templates.
    pub fn with_prefix(self, prefix: &str) -> Self {
        Self {
            full: self.full.prefixed(prefix),
            diff: self.diff.prefixed(prefix),
        }
    }

    pub fn template(&self, kind: BackupKind) -> &Template {
        match kind {
            BackupKind::Full => &self.full,
            BackupKind::Differential => &self.diff,
        }
    }

    /// Renders the remote path for a backup.
    pub fn render(
        &self,
        kind: BackupKind,
        id: &str,
        full_ts: i64,
        diff_ts: Option<i64>,
    ) -> Result<String, ConfigError> {
        let mut values = BTreeMap::new();
        values.insert(ID, id.to_string());
        values.insert(FULL_TS, full_ts.to_string());
        if let Some(ts) = diff_ts {
            values.insert(DIFF_TS, ts.to_string());
        }
        self.template(kind).render(&values)
    }

    /// Decodes a remote path. The differential template is tried first.
    pub fn parse(&self, path: &str) -> Option<BackupRecord> {
        self.diff
            .matches(path)
            .and_then(|fields| build_record(BackupKind::Differential, fields, path))
            .or_else(|| {
                self.full
                    .matches(path)
                    .and_then(|fields| build_record(BackupKind::Full, fields, path))
            })
    }

    /// Remote location to list: the literal part of the full template up to
    /// its last `/`.
    pub fn listing_prefix(&self) -> &str {
        let literal = self.full.literal_prefix();
        match literal.rfind('/') {
            Some(idx) => &literal[..=idx],
            None => literal,
        }
    }
}

/// Placeholder names are fixed: timestamps must be called `full_ts` and
/// `diff_ts`, so the error spells out the full set a template needs.
fn require_fields(template: &Template, setting: &str, names: &[&str]) -> Result<(), ConfigError> {
    let Some(missing) = names.iter().find(|name| !template.has_field(name)) else {
        return Ok(());
    };

    let expected: Vec<String> = names.iter().map(|name| format!("{{{name}}}")).collect();
    Err(ConfigError::Template {
        template: template.source().to_string(),
        message: format!(
            "missing placeholder {{{missing}}}; {setting} must contain {}",
            expected.join(", ")
        ),
    })
}

/// Integer-valued captures: every `*_ts` field that parses. Others are dropped.
fn coerce_timestamps(fields: &BTreeMap<String, String>) -> BTreeMap<&str, i64> {
    fields
        .iter()
        .filter(|(name, _)| name.ends_with("_ts"))
        .filter_map(|(name, value)| value.parse::<i64>().ok().map(|ts| (name.as_str(), ts)))
        .collect()
}

fn build_record(
    kind: BackupKind,
    fields: BTreeMap<String, String>,
    path: &str,
) -> Option<BackupRecord> {
    let timestamps = coerce_timestamps(&fields);
    let full_ts = *timestamps.get(FULL_TS)?;
    let diff_ts = match kind {
        BackupKind::Full => None,
        BackupKind::Differential => Some(*timestamps.get(DIFF_TS)?),
    };
    let id = fields.get(ID)?;
    if !is_plain_identifier(id) {
        return None;
    }
    let id = id.clone();

    Some(BackupRecord {
        id,
        kind,
        full_ts,
        diff_ts,
        remote_path: path.to_string(),
    })
}

/// Identifiers never contain whitespace or path separators. A capture that
/// does comes from an object under a deeper key prefix.
fn is_plain_identifier(id: &str) -> bool {
    !id.chars().any(|c| c.is_whitespace() || c == '/' || c == '\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "{id}_full_{full_ts}.tar.gz";
    const DIFF: &str = "{id}_full_{full_ts}_diff_{diff_ts}.tar.gz";

    fn scheme() -> NamingScheme {
        NamingScheme::new(FULL, DIFF).unwrap().with_prefix("s3://bucket/")
    }

    #[test]
    fn full_render_parses_back() {
        let s = scheme();
        let path = s.render(BackupKind::Full, "www", 1_700_000_000, None).unwrap();
        assert_eq!(path, "s3://bucket/www_full_1700000000.tar.gz");

        let record = s.parse(&path).unwrap();
        assert_eq!(record.kind, BackupKind::Full);
        assert_eq!(record.id, "www");
        assert_eq!(record.full_ts, 1_700_000_000);
        assert_eq!(record.diff_ts, None);
        assert_eq!(record.remote_path, path);
    }

    #[test]
    fn differential_is_never_read_as_full() {
        let s = scheme();
        let path = s
            .render(BackupKind::Differential, "www", 300, Some(350))
            .unwrap();
        assert_eq!(path, "s3://bucket/www_full_300_diff_350.tar.gz");

        let record = s.parse(&path).unwrap();
        assert_eq!(record.kind, BackupKind::Differential);
        assert_eq!(record.id, "www");
        assert_eq!(record.full_ts, 300);
        assert_eq!(record.diff_ts, Some(350));
    }

    #[test]
    fn ids_with_underscores_survive() {
        let s = scheme();
        let path = s
            .render(BackupKind::Differential, "my_site_db", 10, Some(20))
            .unwrap();
        let record = s.parse(&path).unwrap();
        assert_eq!(record.id, "my_site_db");
        assert_eq!((record.full_ts, record.diff_ts), (10, Some(20)));
    }

    #[test]
    fn differential_render_without_diff_ts_fails() {
        let err = scheme()
            .render(BackupKind::Differential, "www", 300, None)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingPlaceholder { ref name, .. } if name == DIFF_TS
        ));
    }

    #[test]
    fn unmatched_paths_yield_nothing() {
        let s = scheme();
        for line in [
            "",
            "DIR s3://bucket/other/",
            "s3://bucket/www_full_abc.tar.gz",
            "s3://bucket/readme.txt",
            "s3://elsewhere/www_full_100.tar.gz",
            "s3://bucket/www_full_100.tar.gz.bak",
        ] {
            assert!(s.parse(line).is_none(), "unexpectedly parsed {line:?}");
        }
    }

    #[test]
    fn non_numeric_diff_ts_falls_back_to_full_template() {
        // The diff template matches but diff_ts is not an integer; the full
        // template then captures "100_diff_x" as full_ts, which also fails.
        assert!(scheme().parse("s3://bucket/www_full_100_diff_x.tar.gz").is_none());
    }

    #[test]
    fn custom_placeholders_are_matched_but_not_rendered() {
        let s = NamingScheme::new(
            "{host}/{id}/full-{full_ts}.tgz",
            "{host}/{id}/diff-{full_ts}-{diff_ts}.tgz",
        )
        .unwrap();
        let record = s.parse("db1/www/diff-5-9.tgz").unwrap();
        assert_eq!(record.id, "www");
        assert_eq!(record.kind, BackupKind::Differential);

        let err = s.render(BackupKind::Full, "www", 5, None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingPlaceholder { ref name, .. } if name == "host"));
    }

    #[test]
    fn templates_missing_required_placeholders_are_rejected() {
        assert!(NamingScheme::new("{id}.tar.gz", DIFF).is_err());
        assert!(NamingScheme::new(FULL, "{id}_full_{full_ts}.tar.gz").is_err());
    }

    #[test]
    fn missing_placeholder_error_names_the_expected_set() {
        let err = NamingScheme::new("{id}_full_{full_date}.tar.gz", DIFF).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("{full_ts}"), "{message}");
        assert!(message.contains("full_backup_name must contain {id}, {full_ts}"), "{message}");

        let err = NamingScheme::new(FULL, "{id}_full_{full_ts}_d_{diff_date}.tar.gz").unwrap_err();
        assert!(err
            .to_string()
            .contains("diff_backup_name must contain {id}, {full_ts}, {diff_ts}"));
    }

    #[test]
    fn nested_keys_do_not_produce_identifiers() {
        let s = scheme();
        assert!(s.parse("s3://bucket/nightly/www_full_100.tar.gz").is_none());
        assert!(s.parse("s3://bucket/a/b_full_1_diff_2.tar.gz").is_none());
        assert_eq!(s.parse("s3://bucket/www_full_100.tar.gz").unwrap().id, "www");
    }

    #[test]
    fn malformed_templates_are_rejected() {
        for source in ["{id", "id}", "{}", "{id-x}"] {
            assert!(Template::compile(source).is_err(), "accepted {source:?}");
        }
    }

    #[test]
    fn escaped_braces_are_literal() {
        let t = Template::compile("{{{id}}}").unwrap();
        let mut values = BTreeMap::new();
        values.insert(ID, "x".to_string());
        assert_eq!(t.render(&values).unwrap(), "{x}");
        assert_eq!(t.matches("{x}").unwrap()["id"], "x");
    }

    #[test]
    fn repeated_placeholder_must_agree() {
        let t = Template::compile("{id}/{id}.tgz").unwrap();
        assert_eq!(t.matches("a/a.tgz").unwrap()["id"], "a");
        assert!(t.matches("a/b.tgz").is_none());
    }

    #[test]
    fn listing_prefix_stops_at_first_placeholder_directory() {
        assert_eq!(scheme().listing_prefix(), "s3://bucket/");

        let nested = NamingScheme::new(
            "hosts/{id}/full_{full_ts}.tar.gz",
            "hosts/{id}/diff_{full_ts}_{diff_ts}.tar.gz",
        )
        .unwrap()
        .with_prefix("s3://bucket/");
        assert_eq!(nested.listing_prefix(), "s3://bucket/hosts/");
    }
}
