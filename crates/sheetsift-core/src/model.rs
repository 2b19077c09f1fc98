use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Entity kind discriminant for extracted business records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Invoice,
    PurchaseOrder,
    Customer,
    Vendor,
    LineItem,
    Unknown,
}

impl EntityKind {
    /// Field holding the natural key for this kind, if it has one.
    pub fn natural_key_field(&self) -> Option<&'static str> {
        match self {
            EntityKind::Invoice => Some("invoice_number"),
            EntityKind::PurchaseOrder => Some("po_number"),
            EntityKind::Customer => Some("customer_id"),
            EntityKind::Vendor => Some("vendor_id"),
            EntityKind::LineItem => Some("line_id"),
            EntityKind::Unknown => None,
        }
    }
}

/// Typed cell value produced by a document parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Number(f64),
    Date(NaiveDate),
    Bool(bool),
    /// Malformed computed field flagged by the upstream parser (e.g. "#DIV/0!").
    FormulaError(String),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }
}

/// A record parsed out of one extracted document. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub kind: EntityKind,
    pub fields: BTreeMap<String, FieldValue>,
    /// Parse certainty reported by the document parser, 0.0–1.0.
    pub confidence: f64,
    /// Document the record came from (archive-relative path).
    pub source: String,
}

impl ExtractedRecord {
    pub fn new(
        kind: EntityKind,
        fields: BTreeMap<String, FieldValue>,
        confidence: f64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            fields,
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Natural key value for this record, if the kind defines one and it is present.
    pub fn natural_key(&self) -> Option<String> {
        let field = self.kind.natural_key_field()?;
        match self.fields.get(field)? {
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Integer(i) => Some(i.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictKind {
    DuplicateKey,
    InvalidAmount,
    DateAnomaly,
    MissingReference,
    AtRiskEntity,
    CompetitorMention,
    SequenceGap,
    FormulaError,
}

impl ConflictKind {
    /// Business-severity weight used to derive triage priority.
    /// Duplicate invoice numbers outrank stylistic anomalies.
    pub fn weight(&self) -> f64 {
        match self {
            ConflictKind::DuplicateKey => 10.0,
            ConflictKind::InvalidAmount => 8.0,
            ConflictKind::FormulaError => 7.0,
            ConflictKind::MissingReference => 6.0,
            ConflictKind::SequenceGap => 5.0,
            ConflictKind::DateAnomaly => 4.0,
            ConflictKind::AtRiskEntity => 3.0,
            ConflictKind::CompetitorMention => 2.0,
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictKind::DuplicateKey => "DUPLICATE_KEY",
            ConflictKind::InvalidAmount => "INVALID_AMOUNT",
            ConflictKind::DateAnomaly => "DATE_ANOMALY",
            ConflictKind::MissingReference => "MISSING_REFERENCE",
            ConflictKind::AtRiskEntity => "AT_RISK_ENTITY",
            ConflictKind::CompetitorMention => "COMPETITOR_MENTION",
            ConflictKind::SequenceGap => "SEQUENCE_GAP",
            ConflictKind::FormulaError => "FORMULA_ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictStatus {
    Pending,
    AutoFixed,
    Accepted,
    Rejected,
}

impl ConflictStatus {
    /// Every status other than Pending is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConflictStatus::Pending)
    }
}

/// A detected data conflict. Created by the detector; only its status is
/// mutated afterwards, and only by the lifecycle manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: u64,
    pub kind: ConflictKind,
    pub description: String,
    /// Source documents / record labels the conflict was detected in.
    pub sources: Vec<String>,
    /// How sure the detector is this is a real conflict, 0.0–1.0.
    pub confidence: f64,
    /// Triage score: confidence x kind weight. Never mutated after creation.
    pub priority: f64,
    pub status: ConflictStatus,
    pub resolved_by: Option<String>,
}

impl Conflict {
    pub fn new(
        id: u64,
        kind: ConflictKind,
        description: impl Into<String>,
        sources: Vec<String>,
        confidence: f64,
    ) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        Self {
            id,
            kind,
            description: description.into(),
            sources,
            confidence,
            priority: confidence * kind.weight(),
            status: ConflictStatus::Pending,
            resolved_by: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchPhase {
    Assessment,
    Optimization,
    Processing,
    Aggregation,
    Complete,
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchPhase::Assessment => "ASSESSMENT",
            BatchPhase::Optimization => "OPTIMIZATION",
            BatchPhase::Processing => "PROCESSING",
            BatchPhase::Aggregation => "AGGREGATION",
            BatchPhase::Complete => "COMPLETE",
        };
        f.write_str(s)
    }
}

/// Point-in-time snapshot of a running batch. Read-only to consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    pub batch_id: String,
    pub phase: BatchPhase,
    pub files_processed: usize,
    pub total_files: usize,
    pub archives_processed: usize,
    pub total_archives: usize,
    pub conflicts_detected: usize,
    pub conflicts_resolved: usize,
    pub cache_hit_rate: f64,
    pub merit: f64,
    pub debt: usize,
    pub eta: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityLabel {
    Excellent,
    Good,
    Moderate,
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityLabel::Excellent => "EXCELLENT",
            QualityLabel::Good => "GOOD",
            QualityLabel::Moderate => "MODERATE",
        };
        f.write_str(s)
    }
}

/// Merit = mean confidence of resolved conflicts, debt = pending count.
/// Recomputed from running sums, never persisted on its own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MeritDebtScore {
    pub merit: f64,
    pub debt: usize,
    pub ratio: f64,
    pub label: QualityLabel,
}

impl MeritDebtScore {
    pub fn compute(resolved_confidence_sum: f64, resolved_count: usize, debt: usize) -> Self {
        let merit = if resolved_count == 0 {
            0.0
        } else {
            (resolved_confidence_sum / resolved_count as f64).clamp(0.0, 1.0)
        };
        // +1 denominator keeps the ratio defined at zero debt
        let ratio = merit / (debt as f64 + 1.0);
        let label = if merit >= 0.90 {
            QualityLabel::Excellent
        } else if merit >= 0.75 {
            QualityLabel::Good
        } else {
            QualityLabel::Moderate
        };
        Self {
            merit,
            debt,
            ratio,
            label,
        }
    }
}

/// Per-archive outcome recorded in the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub path: String,
    pub opened: bool,
    pub files_extracted: usize,
    pub documents_matched: usize,
    pub records_parsed: usize,
    pub conflicts_detected: usize,
    /// Successfully parsed documents / matched documents, 0.0–1.0.
    pub quality: f64,
    pub duration: Duration,
    pub warnings: Vec<String>,
    pub failure: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_derived_from_kind_weight() {
        let c = Conflict::new(1, ConflictKind::DuplicateKey, "dup", vec![], 1.0);
        assert_eq!(c.priority, 10.0);
        let c = Conflict::new(2, ConflictKind::CompetitorMention, "mention", vec![], 0.5);
        assert_eq!(c.priority, 1.0);
        assert!(c.priority >= 0.0);
    }

    #[test]
    fn test_merit_debt_bounds() {
        let s = MeritDebtScore::compute(0.0, 0, 0);
        assert_eq!(s.merit, 0.0);
        assert_eq!(s.ratio, 0.0);
        assert_eq!(s.label, QualityLabel::Moderate);

        let s = MeritDebtScore::compute(3.6, 4, 0);
        assert!((s.merit - 0.9).abs() < 1e-9);
        assert_eq!(s.label, QualityLabel::Excellent);
        // ratio defined at zero debt via the +1 denominator
        assert!((s.ratio - 0.9).abs() < 1e-9);

        let s = MeritDebtScore::compute(1.6, 2, 3);
        assert!((s.merit - 0.8).abs() < 1e-9);
        assert_eq!(s.label, QualityLabel::Good);
        assert!((s.ratio - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!ConflictStatus::Pending.is_terminal());
        assert!(ConflictStatus::AutoFixed.is_terminal());
        assert!(ConflictStatus::Accepted.is_terminal());
        assert!(ConflictStatus::Rejected.is_terminal());
    }
}
