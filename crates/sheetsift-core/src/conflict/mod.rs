//! Rule-based conflict detection over extracted records.

mod rules;

pub use rules::{ConflictDraft, ConflictRule, RuleContext};

use crate::model::{Conflict, ExtractedRecord};
use ahash::AHashSet;
use chrono::NaiveDate;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DetectOptions {
    /// Fraction of conflicts surfaced as top findings.
    pub top_percent: f64,
    /// Floor on top findings when at least that many exist.
    pub min_conflicts: usize,
    pub amount_outlier_threshold: f64,
    pub future_tolerance_days: i64,
    pub date_floor: NaiveDate,
    /// Injectable clock for date-anomaly checks; None means today (UTC).
    pub today: Option<NaiveDate>,
    pub competitor_terms: Vec<String>,
    pub at_risk_terms: Vec<String>,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            top_percent: 0.10,
            min_conflicts: 5,
            amount_outlier_threshold: 1_000_000.0,
            future_tolerance_days: 30,
            date_floor: NaiveDate::from_ymd_opt(1990, 1, 1).expect("valid date"),
            today: None,
            competitor_terms: Vec::new(),
            at_risk_terms: [
                "bankrupt",
                "insolven",
                "liquidation",
                "receivership",
                "past due",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug)]
pub struct DetectionOutcome {
    /// All conflicts, sorted by priority descending.
    pub all: Vec<Conflict>,
    /// Top fraction by priority, never fewer than `min_conflicts` when that
    /// many exist.
    pub top: Vec<Conflict>,
}

/// Runs the rule set over record collections. Safe to share across worker
/// threads; the only mutable state is the running known-entity index and
/// the id counter, both interior.
pub struct ConflictDetector {
    rules: Vec<Box<dyn ConflictRule>>,
    known_entities: RwLock<AHashSet<String>>,
    next_id: AtomicU64,
}

impl ConflictDetector {
    pub fn new() -> Self {
        Self {
            rules: rules::default_rules(),
            known_entities: RwLock::new(AHashSet::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_rules(rules: Vec<Box<dyn ConflictRule>>) -> Self {
        Self {
            rules,
            known_entities: RwLock::new(AHashSet::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Clear accumulated detector state (known entities) between independent
    /// runs that should not share history. Conflict ids keep counting up.
    pub fn reset(&self) {
        self.known_entities
            .write()
            .expect("known-entity lock poisoned")
            .clear();
    }

    pub fn detect(
        &self,
        records: &[ExtractedRecord],
        source_label: &str,
        options: &DetectOptions,
    ) -> DetectionOutcome {
        // Register entities defined by this record set before resolving
        // references, and fold in what earlier runs taught us.
        let known_entities = {
            let mut index = self
                .known_entities
                .write()
                .expect("known-entity lock poisoned");
            for record in records {
                if let Some(key) = rules::entity_key(record) {
                    index.insert(key);
                }
            }
            index.clone()
        };

        let ctx = RuleContext {
            today: options
                .today
                .unwrap_or_else(|| chrono::Utc::now().date_naive()),
            date_floor: options.date_floor,
            future_tolerance_days: options.future_tolerance_days,
            amount_outlier_threshold: options.amount_outlier_threshold,
            known_entities,
            competitor_terms: options.competitor_terms.clone(),
            at_risk_terms: options.at_risk_terms.clone(),
        };

        // Rules are independent and read-only over the record set.
        let mut drafts: Vec<ConflictDraft> = self
            .rules
            .par_iter()
            .flat_map_iter(|rule| rule.apply(records, &ctx))
            .collect();

        // Deterministic ordering before ids are assigned.
        drafts.sort_by(|a, b| {
            (b.confidence * b.kind.weight())
                .partial_cmp(&(a.confidence * a.kind.weight()))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.description.cmp(&b.description))
        });

        let mut all: Vec<Conflict> = drafts
            .into_iter()
            .map(|draft| {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let sources = if source_label.is_empty() {
                    draft.sources
                } else {
                    draft
                        .sources
                        .iter()
                        .map(|s| format!("{}/{}", source_label, s))
                        .collect()
                };
                Conflict::new(id, draft.kind, draft.description, sources, draft.confidence)
            })
            .collect();

        all.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        let top = triage(&all, options.top_percent, options.min_conflicts);
        debug!(
            "detected {} conflicts ({} top) in {} records from '{}'",
            all.len(),
            top.len(),
            records.len(),
            source_label
        );

        DetectionOutcome { all, top }
    }
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Top `top_percent` fraction by priority, floored at `min_conflicts` when
/// at least that many exist.
fn triage(sorted: &[Conflict], top_percent: f64, min_conflicts: usize) -> Vec<Conflict> {
    let k = sorted.len();
    if k == 0 {
        return Vec::new();
    }
    let fraction = (k as f64 * top_percent).ceil() as usize;
    let take = fraction.max(min_conflicts).min(k);
    sorted[..take].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConflictKind, ConflictStatus, EntityKind, FieldValue};
    use std::collections::BTreeMap;

    fn invoice(number: &str, amount: f64, source: &str) -> ExtractedRecord {
        let mut fields = BTreeMap::new();
        fields.insert(
            "invoice_number".to_string(),
            FieldValue::Text(number.to_string()),
        );
        fields.insert("amount".to_string(), FieldValue::Number(amount));
        ExtractedRecord::new(EntityKind::Invoice, fields, 1.0, source)
    }

    #[test]
    fn test_duplicate_and_negative_amount() {
        // 9 records: one exact duplicate invoice-number pair, one negative amount.
        let mut records: Vec<ExtractedRecord> = (1..=8)
            .map(|i| invoice(&format!("INV-100{}", i), 100.0 * i as f64, "a.csv"))
            .collect();
        records.push(invoice("INV-1003", 42.0, "b.csv")); // duplicate of #3
        records[4] = invoice("INV-1005", -50.0, "a.csv"); // negative amount

        let detector = ConflictDetector::new();
        let outcome = detector.detect(&records, "test", &DetectOptions::default());

        assert_eq!(outcome.all.len(), 2, "conflicts: {:?}", outcome.all);
        // Fewer than min_conflicts exist, so all are surfaced.
        assert_eq!(outcome.top.len(), 2);

        let dup = outcome
            .all
            .iter()
            .find(|c| c.kind == ConflictKind::DuplicateKey)
            .expect("duplicate detected");
        assert_eq!(dup.confidence, 1.0);
        assert_eq!(dup.status, ConflictStatus::Pending);

        let neg = outcome
            .all
            .iter()
            .find(|c| c.kind == ConflictKind::InvalidAmount)
            .expect("negative amount detected");
        assert!(neg.confidence < 1.0);
        // Priority ordering: duplicate (1.0 x 10) outranks amount (0.95 x 8)
        assert_eq!(outcome.all[0].kind, ConflictKind::DuplicateKey);
    }

    #[test]
    fn test_triage_counts() {
        // 40 distinct sequence numbers with every other one missing produce
        // a pile of gap conflicts; check the triage arithmetic on top of it.
        let records: Vec<ExtractedRecord> = (1..=40)
            .map(|i| invoice(&format!("INV-{}", i * 2), 10.0, "a.csv"))
            .collect();
        let detector = ConflictDetector::new();
        let outcome = detector.detect(&records, "", &DetectOptions::default());

        let k = outcome.all.len();
        assert_eq!(k, 39); // 39 gaps
        let expected = ((k as f64 * 0.10).ceil() as usize).max(5);
        assert_eq!(outcome.top.len(), expected);
    }

    #[test]
    fn test_missing_reference_and_reset() {
        let mut customer_fields = BTreeMap::new();
        customer_fields.insert(
            "customer_id".to_string(),
            FieldValue::Text("C-1".to_string()),
        );
        customer_fields.insert("name".to_string(), FieldValue::Text("Acme".to_string()));
        let customer =
            ExtractedRecord::new(EntityKind::Customer, customer_fields, 1.0, "customers.csv");

        let mut inv = invoice("INV-1", 10.0, "inv.csv");
        inv.fields
            .insert("customer_id".to_string(), FieldValue::Text("C-2".to_string()));

        let detector = ConflictDetector::new();
        let outcome = detector.detect(
            &[customer.clone(), inv.clone()],
            "",
            &DetectOptions::default(),
        );
        assert!(outcome
            .all
            .iter()
            .any(|c| c.kind == ConflictKind::MissingReference));

        // The customer index persists across runs until reset.
        inv.fields
            .insert("customer_id".to_string(), FieldValue::Text("C-1".to_string()));
        let outcome = detector.detect(&[inv.clone()], "", &DetectOptions::default());
        assert!(outcome
            .all
            .iter()
            .all(|c| c.kind != ConflictKind::MissingReference));

        detector.reset();
        let outcome = detector.detect(&[inv], "", &DetectOptions::default());
        assert!(outcome
            .all
            .iter()
            .any(|c| c.kind == ConflictKind::MissingReference));
    }

    #[test]
    fn test_formula_error_rule() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "invoice_number".to_string(),
            FieldValue::Text("INV-9".to_string()),
        );
        fields.insert(
            "total".to_string(),
            FieldValue::FormulaError("#DIV/0!".to_string()),
        );
        let record = ExtractedRecord::new(EntityKind::Invoice, fields, 0.5, "x.csv");

        let detector = ConflictDetector::new();
        let outcome = detector.detect(&[record], "", &DetectOptions::default());
        assert!(outcome
            .all
            .iter()
            .any(|c| c.kind == ConflictKind::FormulaError));
    }
}
