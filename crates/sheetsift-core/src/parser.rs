use crate::error::Error;
use crate::model::{EntityKind, ExtractedRecord, FieldValue};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::trace;

/// Seam to the external document parser: raw extracted document in, zero or
/// more typed records out. Format-specific cell parsing lives behind this
/// trait, not in the pipeline.
pub trait DocumentParser: Send + Sync {
    /// Entry extensions this parser understands (lowercase, no dot).
    fn supported_extensions(&self) -> &[&'static str];

    fn parse(&self, document: &Path, entry_path: &str) -> Result<Vec<ExtractedRecord>, Error>;

    fn supports(&self, entry_path: &str) -> bool {
        let ext = Path::new(entry_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext {
            Some(ext) => self.supported_extensions().iter().any(|e| *e == ext),
            None => false,
        }
    }
}

/// Minimal CSV parser so the pipeline runs end to end without a host parser.
/// Header row names the fields; entity kind is inferred from the natural-key
/// column present.
pub struct CsvDocumentParser;

const FORMULA_ERRORS: [&str; 6] = ["#DIV/0!", "#REF!", "#VALUE!", "#NAME?", "#NUM!", "#N/A"];

impl CsvDocumentParser {
    fn parse_value(raw: &str) -> FieldValue {
        let trimmed = raw.trim();
        if FORMULA_ERRORS.iter().any(|e| trimmed.eq_ignore_ascii_case(e)) {
            return FieldValue::FormulaError(trimmed.to_string());
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return FieldValue::Integer(i);
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            return FieldValue::Number(n);
        }
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return FieldValue::Date(d);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => FieldValue::Bool(true),
            "false" => FieldValue::Bool(false),
            _ => FieldValue::Text(trimmed.to_string()),
        }
    }

    fn infer_kind(headers: &[String]) -> EntityKind {
        let has = |name: &str| headers.iter().any(|h| h == name);
        if has("invoice_number") {
            EntityKind::Invoice
        } else if has("po_number") {
            EntityKind::PurchaseOrder
        } else if has("customer_id") && has("name") {
            EntityKind::Customer
        } else if has("vendor_id") && has("name") {
            EntityKind::Vendor
        } else if has("line_id") {
            EntityKind::LineItem
        } else {
            EntityKind::Unknown
        }
    }
}

impl DocumentParser for CsvDocumentParser {
    fn supported_extensions(&self) -> &[&'static str] {
        &["csv"]
    }

    fn parse(&self, document: &Path, entry_path: &str) -> Result<Vec<ExtractedRecord>, Error> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(document)
            .map_err(|e| Error::Parse {
                document: entry_path.to_string(),
                reason: e.to_string(),
            })?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| Error::Parse {
                document: entry_path.to_string(),
                reason: e.to_string(),
            })?
            .iter()
            .map(|h| h.trim().to_ascii_lowercase().replace(' ', "_"))
            .collect();

        let kind = Self::infer_kind(&headers);
        let mut records = Vec::new();

        for row in reader.records() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    trace!("skipping malformed row in {}: {}", entry_path, e);
                    continue;
                }
            };

            let mut fields = BTreeMap::new();
            let mut error_cells = 0usize;
            for (header, raw) in headers.iter().zip(row.iter()) {
                let value = Self::parse_value(raw);
                if matches!(value, FieldValue::FormulaError(_)) {
                    error_cells += 1;
                }
                fields.insert(header.clone(), value);
            }
            if fields.is_empty() {
                continue;
            }

            // Parse certainty drops with each malformed cell.
            let confidence = 1.0 - error_cells as f64 / fields.len() as f64;
            records.push(ExtractedRecord::new(kind, fields, confidence, entry_path));
        }

        Ok(records)
    }
}
