//! Source map `mappings` and position lookup.
//!
//! Decoding is left to the `sourcemap` crate; this module keeps the per-line
//! view of the decoded tokens that [`Mappings::lookup`] works on.

use serde_json::json;
use sourcemap::SourceMap;

/// A decoded segment. Source fields are absent for segments that map to no
/// original position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub generated_column: u32,
    pub original: Option<OriginalPosition>,
}

/// 0-based line and column in the original source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriginalPosition {
    pub source: u32,
    pub line: u32,
    pub column: u32,
}

/// Mapping segments per generated line (0-based), each line sorted by
/// generated column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mappings {
    lines: Vec<Vec<Segment>>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceMapError {
    #[error("source map is invalid: {0}")]
    Invalid(String),
}

impl Mappings {
    /// Accept either a whole source map (v3) JSON document or a bare
    /// `mappings` string. A bare string refers to a single original source.
    pub fn parse(text: &str) -> Result<Mappings, SourceMapError> {
        let trimmed = text.trim();
        let map = if trimmed.starts_with('{') {
            SourceMap::from_slice(trimmed.as_bytes())
        } else {
            let document = json!({
                "version": 3,
                "sources": [""],
                "names": [],
                "mappings": trimmed,
            });
            SourceMap::from_slice(document.to_string().as_bytes())
        }
        .map_err(|e| SourceMapError::Invalid(e.to_string()))?;
        Ok(Mappings::from_source_map(&map))
    }

    pub fn from_source_map(map: &SourceMap) -> Mappings {
        let mut lines: Vec<Vec<Segment>> = Vec::new();
        for token in map.tokens() {
            let line = token.get_dst_line() as usize;
            if lines.len() <= line {
                lines.resize_with(line + 1, Vec::new);
            }
            let original = token.get_source().map(|_| OriginalPosition {
                source: token.get_src_id(),
                line: token.get_src_line(),
                column: token.get_src_col(),
            });
            lines[line].push(Segment {
                generated_column: token.get_dst_col(),
                original,
            });
        }
        for segments in &mut lines {
            segments.sort_by_key(|s| s.generated_column);
        }
        Mappings { lines }
    }

    pub fn lines(&self) -> &[Vec<Segment>] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(Vec::is_empty)
    }

    /// Find the original position for a 0-based generated position: the
    /// nearest mapped segment at or before `column` on `line`, else the
    /// first mapped segment on `line`, else the last mapped segment on the
    /// nearest preceding line.
    pub fn lookup(&self, line: usize, column: u32) -> Option<OriginalPosition> {
        let on_line = self.lines.get(line).and_then(|segments| {
            segments
                .iter()
                .rev()
                .filter(|s| s.generated_column <= column)
                .find_map(|s| s.original)
                .or_else(|| segments.iter().find_map(|s| s.original))
        });
        on_line.or_else(|| {
            self.lines[..line.min(self.lines.len())]
                .iter()
                .rev()
                .find_map(|l| l.iter().rev().find_map(|s| s.original))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: u32, column: u32) -> Option<OriginalPosition> {
        Some(OriginalPosition {
            source: 0,
            line,
            column,
        })
    }

    #[test]
    fn test_decode_relative_fields() {
        // line 0: col 0 -> (0, 0); col 4 -> (0, 4)
        // line 1: empty
        // line 2: col 2 -> (2, 0)  [line +2, column -4]
        let m = Mappings::parse("AAAA,IAAI;;EAEJ").unwrap();
        assert_eq!(m.lines().len(), 3);
        assert_eq!(m.lines()[0][1].original, pos(0, 4));
        assert!(m.lines()[1].is_empty());
        assert_eq!(
            m.lines()[2][0],
            Segment {
                generated_column: 2,
                original: pos(2, 0)
            }
        );
    }

    #[test]
    fn test_lookup() {
        let m = Mappings::parse("AAAA,IAAI;;EAEJ").unwrap();
        assert_eq!(m.lookup(0, 0), pos(0, 0));
        assert_eq!(m.lookup(0, 6), pos(0, 4));
        // Before the first segment of the line: first segment on the line
        assert_eq!(m.lookup(2, 0), pos(2, 0));
        // Empty line: nearest preceding mapping
        assert_eq!(m.lookup(1, 3), pos(0, 4));
        // Past the end: nearest preceding mapping
        assert_eq!(m.lookup(10, 0), pos(2, 0));
        assert_eq!(Mappings::default().lookup(0, 0), None);
    }

    #[test]
    fn test_parse_document() {
        let m = Mappings::parse(
            r#"{"version":3,"sources":["app.py"],"names":[],"mappings":"AAAA;AACA"}"#,
        )
        .unwrap();
        assert_eq!(m.lookup(1, 0), pos(1, 0));
        assert!(matches!(
            Mappings::parse("{not json"),
            Err(SourceMapError::Invalid(_))
        ));
    }

    #[test]
    fn test_malformed_mappings() {
        assert!(Mappings::parse("AA").is_err());
        assert!(Mappings::parse("A!").is_err());
        assert!(Mappings::parse("").unwrap().is_empty());
    }
}
