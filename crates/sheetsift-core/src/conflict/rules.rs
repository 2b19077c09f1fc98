use crate::model::{ConflictKind, EntityKind, ExtractedRecord, FieldValue};
use ahash::{AHashMap, AHashSet};
use chrono::NaiveDate;

/// Shared read-only context handed to every rule.
pub struct RuleContext {
    pub today: NaiveDate,
    /// Dates before this are implausible for business documents.
    pub date_floor: NaiveDate,
    pub future_tolerance_days: i64,
    pub amount_outlier_threshold: f64,
    /// Entity keys (e.g. "customer:C-100") known from this run plus the
    /// detector's accumulated index.
    pub known_entities: AHashSet<String>,
    pub competitor_terms: Vec<String>,
    pub at_risk_terms: Vec<String>,
}

/// A conflict found by one rule, before the detector assigns an id and
/// computes priority.
#[derive(Debug, Clone)]
pub struct ConflictDraft {
    pub kind: ConflictKind,
    pub description: String,
    pub sources: Vec<String>,
    pub confidence: f64,
}

/// One detection rule. Rules are independent and read-only over the record
/// set, so the detector runs them in parallel.
pub trait ConflictRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, records: &[ExtractedRecord], ctx: &RuleContext) -> Vec<ConflictDraft>;
}

pub fn default_rules() -> Vec<Box<dyn ConflictRule>> {
    vec![
        Box::new(DuplicateKeyRule),
        Box::new(InvalidAmountRule),
        Box::new(DateAnomalyRule),
        Box::new(MissingReferenceRule),
        Box::new(SequenceGapRule),
        Box::new(FormulaErrorRule),
        Box::new(AtRiskEntityRule),
        Box::new(CompetitorMentionRule),
    ]
}

fn is_amount_field(name: &str) -> bool {
    ["amount", "total", "subtotal", "price", "unit_price"]
        .iter()
        .any(|n| name == *n || name.ends_with(&format!("_{}", n)))
}

/// Exact natural-key duplicates score 1.0; keys equal only after
/// normalization (case/whitespace) score lower.
pub struct DuplicateKeyRule;

impl ConflictRule for DuplicateKeyRule {
    fn name(&self) -> &'static str {
        "duplicate_key"
    }

    fn apply(&self, records: &[ExtractedRecord], _ctx: &RuleContext) -> Vec<ConflictDraft> {
        let mut exact: AHashMap<(EntityKind, String), Vec<&ExtractedRecord>> = AHashMap::new();
        for record in records {
            if let Some(key) = record.natural_key() {
                exact.entry((record.kind, key)).or_default().push(record);
            }
        }

        let mut drafts = Vec::new();
        for ((kind, key), group) in &exact {
            if group.len() >= 2 {
                drafts.push(ConflictDraft {
                    kind: ConflictKind::DuplicateKey,
                    description: format!(
                        "{:?} key '{}' appears {} times",
                        kind,
                        key,
                        group.len()
                    ),
                    sources: group.iter().map(|r| r.source.clone()).collect(),
                    confidence: 1.0,
                });
            }
        }

        // Near-duplicates: same key after normalization, different raw keys.
        let mut fuzzy: AHashMap<(EntityKind, String), AHashSet<String>> = AHashMap::new();
        for record in records {
            if let Some(key) = record.natural_key() {
                let normalized = key.to_ascii_lowercase().replace([' ', '-', '_'], "");
                fuzzy
                    .entry((record.kind, normalized))
                    .or_default()
                    .insert(key);
            }
        }
        for ((kind, _), raw_keys) in &fuzzy {
            if raw_keys.len() >= 2 {
                let mut keys: Vec<&String> = raw_keys.iter().collect();
                keys.sort();
                drafts.push(ConflictDraft {
                    kind: ConflictKind::DuplicateKey,
                    description: format!(
                        "{:?} keys {:?} match after normalization",
                        kind, keys
                    ),
                    sources: Vec::new(),
                    confidence: 0.8,
                });
            }
        }

        drafts
    }
}

/// Non-positive monetary values, or values past the outlier threshold.
pub struct InvalidAmountRule;

impl ConflictRule for InvalidAmountRule {
    fn name(&self) -> &'static str {
        "invalid_amount"
    }

    fn apply(&self, records: &[ExtractedRecord], ctx: &RuleContext) -> Vec<ConflictDraft> {
        let mut drafts = Vec::new();
        for record in records {
            for (field, value) in &record.fields {
                if !is_amount_field(field) {
                    continue;
                }
                let Some(n) = value.as_number() else { continue };
                if n <= 0.0 {
                    drafts.push(ConflictDraft {
                        kind: ConflictKind::InvalidAmount,
                        description: format!("non-positive value {} in field '{}'", n, field),
                        sources: vec![record.source.clone()],
                        confidence: 0.95,
                    });
                } else if n > ctx.amount_outlier_threshold {
                    drafts.push(ConflictDraft {
                        kind: ConflictKind::InvalidAmount,
                        description: format!(
                            "value {} in field '{}' exceeds outlier threshold {}",
                            n, field, ctx.amount_outlier_threshold
                        ),
                        sources: vec![record.source.clone()],
                        confidence: 0.7,
                    });
                }
            }
        }
        drafts
    }
}

/// Future dates beyond tolerance, or dates before a plausible minimum.
pub struct DateAnomalyRule;

impl ConflictRule for DateAnomalyRule {
    fn name(&self) -> &'static str {
        "date_anomaly"
    }

    fn apply(&self, records: &[ExtractedRecord], ctx: &RuleContext) -> Vec<ConflictDraft> {
        let horizon = ctx.today + chrono::Duration::days(ctx.future_tolerance_days);
        let mut drafts = Vec::new();
        for record in records {
            for (field, value) in &record.fields {
                let Some(date) = value.as_date() else { continue };
                if date > horizon {
                    drafts.push(ConflictDraft {
                        kind: ConflictKind::DateAnomaly,
                        description: format!("future date {} in field '{}'", date, field),
                        sources: vec![record.source.clone()],
                        confidence: 0.8,
                    });
                } else if date < ctx.date_floor {
                    drafts.push(ConflictDraft {
                        kind: ConflictKind::DateAnomaly,
                        description: format!(
                            "implausibly old date {} in field '{}'",
                            date, field
                        ),
                        sources: vec![record.source.clone()],
                        confidence: 0.85,
                    });
                }
            }
        }
        drafts
    }
}

// Reference field name → the entity namespace it must resolve in.
const REFERENCE_FIELDS: [(&str, &str); 3] = [
    ("customer_id", "customer"),
    ("vendor_id", "vendor"),
    ("po_ref", "po"),
];

/// Namespaced key an entity-bearing record contributes to the known set.
pub fn entity_key(record: &ExtractedRecord) -> Option<String> {
    let namespace = match record.kind {
        EntityKind::Customer => "customer",
        EntityKind::Vendor => "vendor",
        EntityKind::PurchaseOrder => "po",
        _ => return None,
    };
    record.natural_key().map(|k| format!("{}:{}", namespace, k))
}

/// Foreign keys referring to entities absent from the known entity set.
pub struct MissingReferenceRule;

impl ConflictRule for MissingReferenceRule {
    fn name(&self) -> &'static str {
        "missing_reference"
    }

    fn apply(&self, records: &[ExtractedRecord], ctx: &RuleContext) -> Vec<ConflictDraft> {
        let mut drafts = Vec::new();
        for record in records {
            for (field, namespace) in REFERENCE_FIELDS {
                // The defining record itself is not a reference.
                if record.kind.natural_key_field() == Some(field) {
                    continue;
                }
                let Some(value) = record.field(field) else { continue };
                let id = match value {
                    FieldValue::Text(s) => s.clone(),
                    FieldValue::Integer(i) => i.to_string(),
                    _ => continue,
                };
                let key = format!("{}:{}", namespace, id);
                if !ctx.known_entities.contains(&key) {
                    drafts.push(ConflictDraft {
                        kind: ConflictKind::MissingReference,
                        description: format!(
                            "field '{}' refers to unknown {} '{}'",
                            field, namespace, id
                        ),
                        sources: vec![record.source.clone()],
                        confidence: 0.75,
                    });
                }
            }
        }
        drafts
    }
}

/// Gaps in numeric identifier sequences expected to be contiguous.
pub struct SequenceGapRule;

impl ConflictRule for SequenceGapRule {
    fn name(&self) -> &'static str {
        "sequence_gap"
    }

    fn apply(&self, records: &[ExtractedRecord], _ctx: &RuleContext) -> Vec<ConflictDraft> {
        // Group keys by (kind, non-numeric prefix), then look for skips in
        // the trailing-number sequence.
        let mut groups: AHashMap<(EntityKind, String), Vec<u64>> = AHashMap::new();
        for record in records {
            let Some(key) = record.natural_key() else { continue };
            let split = key
                .rfind(|c: char| !c.is_ascii_digit())
                .map(|i| i + 1)
                .unwrap_or(0);
            let (prefix, digits) = key.split_at(split);
            if digits.is_empty() {
                continue;
            }
            if let Ok(n) = digits.parse::<u64>() {
                groups
                    .entry((record.kind, prefix.to_string()))
                    .or_default()
                    .push(n);
            }
        }

        let mut drafts = Vec::new();
        for ((kind, prefix), mut numbers) in groups {
            if numbers.len() < 2 {
                continue;
            }
            numbers.sort_unstable();
            numbers.dedup();
            for pair in numbers.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                if b - a > 1 {
                    drafts.push(ConflictDraft {
                        kind: ConflictKind::SequenceGap,
                        description: format!(
                            "{:?} sequence '{}' skips from {} to {} ({} missing)",
                            kind,
                            prefix,
                            a,
                            b,
                            b - a - 1
                        ),
                        sources: Vec::new(),
                        confidence: 0.6,
                    });
                }
            }
        }
        drafts
    }
}

/// Malformed computed fields flagged by the upstream parser.
pub struct FormulaErrorRule;

impl ConflictRule for FormulaErrorRule {
    fn name(&self) -> &'static str {
        "formula_error"
    }

    fn apply(&self, records: &[ExtractedRecord], _ctx: &RuleContext) -> Vec<ConflictDraft> {
        let mut drafts = Vec::new();
        for record in records {
            for (field, value) in &record.fields {
                if let FieldValue::FormulaError(raw) = value {
                    drafts.push(ConflictDraft {
                        kind: ConflictKind::FormulaError,
                        description: format!("formula error {} in field '{}'", raw, field),
                        sources: vec![record.source.clone()],
                        confidence: 0.9,
                    });
                }
            }
        }
        drafts
    }
}

fn text_fields_matching<'a>(
    record: &'a ExtractedRecord,
    terms: &'a [String],
) -> impl Iterator<Item = (&'a String, &'a str)> + 'a {
    record.fields.iter().filter_map(move |(field, value)| {
        let text = value.as_text()?;
        let lowered = text.to_ascii_lowercase();
        terms
            .iter()
            .find(|t| lowered.contains(t.to_ascii_lowercase().as_str()))
            .map(|term| (field, term.as_str()))
    })
}

/// Distress-language screening over free-text fields.
pub struct AtRiskEntityRule;

impl ConflictRule for AtRiskEntityRule {
    fn name(&self) -> &'static str {
        "at_risk_entity"
    }

    fn apply(&self, records: &[ExtractedRecord], ctx: &RuleContext) -> Vec<ConflictDraft> {
        let mut drafts = Vec::new();
        for record in records {
            for (field, term) in text_fields_matching(record, &ctx.at_risk_terms) {
                drafts.push(ConflictDraft {
                    kind: ConflictKind::AtRiskEntity,
                    description: format!("risk term '{}' in field '{}'", term, field),
                    sources: vec![record.source.clone()],
                    confidence: 0.55,
                });
            }
        }
        drafts
    }
}

/// Configured competitor names appearing in free-text fields.
pub struct CompetitorMentionRule;

impl ConflictRule for CompetitorMentionRule {
    fn name(&self) -> &'static str {
        "competitor_mention"
    }

    fn apply(&self, records: &[ExtractedRecord], ctx: &RuleContext) -> Vec<ConflictDraft> {
        let mut drafts = Vec::new();
        for record in records {
            for (field, term) in text_fields_matching(record, &ctx.competitor_terms) {
                drafts.push(ConflictDraft {
                    kind: ConflictKind::CompetitorMention,
                    description: format!("competitor '{}' mentioned in field '{}'", term, field),
                    sources: vec![record.source.clone()],
                    confidence: 0.5,
                });
            }
        }
        drafts
    }
}
