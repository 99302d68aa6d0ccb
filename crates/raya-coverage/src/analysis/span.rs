//! Spans and span tables
//!
//! A span is one instrumentable execution point of a unit. Its index is the
//! position of its cell in the unit's payload array.

use crate::error::CoverageError;
use crate::lowered::SourceRange;
use serde::{Deserialize, Serialize};

/// Dense, 0-based span index within one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanIndex(pub u32);

impl SpanIndex {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for SpanIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pre-order ordinal of a node within its unit
///
/// Nested unit bodies are numbered separately. Sites let the injector find the
/// node a span belongs to without repeating reachability analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub u32);

/// What part of the unit a span covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// Entry into the unit body
    UnitEntry,
    /// An effectful statement, including jumps, returns and throws
    Statement,
    /// Evaluation of an `if` or `switch` condition
    Condition,
    /// Evaluation of a loop condition, once per attempted iteration
    LoopHeader,
    /// Entry into a switch arm
    SwitchArm,
    /// Entry into a catch block
    CatchEntry,
    /// Entry into a finally block
    FinallyEntry,
    /// A jump target
    Label,
    /// Acquisition of a `lock`/`using` resource
    ScopeAcquire,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SpanKind::UnitEntry => "entry",
            SpanKind::Statement => "stmt",
            SpanKind::Condition => "cond",
            SpanKind::LoopHeader => "loop",
            SpanKind::SwitchArm => "arm",
            SpanKind::CatchEntry => "catch",
            SpanKind::FinallyEntry => "finally",
            SpanKind::Label => "label",
            SpanKind::ScopeAcquire => "scope",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub index: SpanIndex,
    pub kind: SpanKind,
    pub site: SiteId,
    pub range: SourceRange,
}

/// Ordered spans of one unit, frozen once analysis completes
///
/// Serialized as a plain list; reading one back checks that the indices are
/// `0..n` in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Span>", into = "Vec<Span>")]
pub struct SpanTable {
    spans: Vec<Span>,
}

impl SpanTable {
    /// Indices must already be `0..spans.len()` in order
    pub(crate) fn from_spans(spans: Vec<Span>) -> Self {
        debug_assert!(spans
            .iter()
            .enumerate()
            .all(|(i, s)| s.index.as_usize() == i));
        Self { spans }
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn get(&self, index: SpanIndex) -> Option<&Span> {
        self.spans.get(index.as_usize())
    }

    /// Source range of a span, for mapping flushed cells back to source
    pub fn range_of(&self, index: SpanIndex) -> Option<SourceRange> {
        self.get(index).map(|s| s.range)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Span> {
        self.spans.iter()
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Spans of one kind, in index order
    pub fn of_kind(&self, kind: SpanKind) -> impl Iterator<Item = &Span> + '_ {
        self.spans.iter().filter(move |s| s.kind == kind)
    }
}

impl<'a> IntoIterator for &'a SpanTable {
    type Item = &'a Span;
    type IntoIter = std::slice::Iter<'a, Span>;

    fn into_iter(self) -> Self::IntoIter {
        self.spans.iter()
    }
}

impl TryFrom<Vec<Span>> for SpanTable {
    type Error = CoverageError;

    fn try_from(spans: Vec<Span>) -> Result<Self, Self::Error> {
        if let Some((position, span)) = spans
            .iter()
            .enumerate()
            .find(|(i, s)| s.index.as_usize() != *i)
        {
            return Err(CoverageError::NonContiguousSpans {
                position,
                found: span.index,
            });
        }
        Ok(Self { spans })
    }
}

impl From<SpanTable> for Vec<Span> {
    fn from(table: SpanTable) -> Self {
        table.spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(i: u32, kind: SpanKind, start: u32) -> Span {
        Span {
            index: SpanIndex(i),
            kind,
            site: SiteId(i),
            range: SourceRange::new(start, start + 4),
        }
    }

    #[test]
    fn test_table_lookup() {
        let table = SpanTable::from_spans(vec![
            span(0, SpanKind::UnitEntry, 0),
            span(1, SpanKind::Condition, 8),
            span(2, SpanKind::Statement, 16),
        ]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.range_of(SpanIndex(1)), Some(SourceRange::new(8, 12)));
        assert!(table.get(SpanIndex(3)).is_none());
        assert_eq!(table.of_kind(SpanKind::Statement).count(), 1);
    }

    #[test]
    fn test_table_serializes_as_list() {
        let table = SpanTable::from_spans(vec![span(0, SpanKind::UnitEntry, 0)]);
        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json[0]["kind"], "unit_entry");
        assert_eq!(json[0]["index"], 0);
        assert_eq!(json[0]["range"]["end"], 4);
    }

    #[test]
    fn test_table_reads_back_from_json() {
        let table = SpanTable::from_spans(vec![
            span(0, SpanKind::UnitEntry, 0),
            span(1, SpanKind::Label, 8),
        ]);
        let json = serde_json::to_string(&table).unwrap();
        let parsed: SpanTable = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn test_table_rejects_gaps_when_read() {
        let gapped = vec![span(0, SpanKind::UnitEntry, 0), span(2, SpanKind::Statement, 8)];
        let json = serde_json::to_string(&gapped).unwrap();
        assert!(serde_json::from_str::<SpanTable>(&json).is_err());
        assert_eq!(
            SpanTable::try_from(gapped).unwrap_err(),
            CoverageError::NonContiguousSpans {
                position: 1,
                found: SpanIndex(2)
            }
        );
    }
}
