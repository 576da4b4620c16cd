use serde::Deserialize;

/// One patient encounter as submitted by the caller.
///
/// Lives for a single request. Every field must be a JSON string; the
/// date is kept exactly as sent and never parsed.
#[derive(Debug, Clone, Deserialize)]
pub struct Visit {
    pub patient_name: String,
    pub date_of_visit: String,
    pub notes: String,
}
