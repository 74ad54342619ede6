//! Markdown rendering of diagnosis results.

use crate::domain::diagnosis::Diagnosis;
use crate::domain::evidence::{Evidence, EvidenceSource, SourceEvidence};

/// Render a human-readable markdown summary of a diagnosis against the
/// evidence it was computed from.
pub fn render_diagnosis_md(diagnosis: &Diagnosis, evidence: &Evidence) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Deployment Diagnosis: {}\n\n", diagnosis.run_id));
    out.push_str(&format!(
        "Evidence collected {} (window from {}).\n\n",
        diagnosis.evidence_collected_at.to_rfc3339(),
        evidence.window_from.to_rfc3339()
    ));

    out.push_str("## Findings\n\n");
    for (rank, finding) in diagnosis.findings.iter().enumerate() {
        out.push_str(&format!(
            "### {}. {} (confidence {:.2})\n",
            rank + 1,
            finding.cause,
            finding.confidence
        ));
        out.push_str(&format!("- remediation: {}\n", finding.remediation));
        if finding.evidence_refs.is_empty() {
            out.push_str("- supporting records: none\n\n");
            continue;
        }
        out.push_str("- supporting records:\n");
        for id in &finding.evidence_refs {
            if let Some(record) = evidence.all_records().find(|r| r.id == *id) {
                out.push_str(&format!(
                    "  - `{}` [{}] {}\n",
                    id,
                    record.timestamp.to_rfc3339(),
                    record.message
                ));
            }
        }
        out.push('\n');
    }

    out.push_str("## Sources\n");
    for source in EvidenceSource::ALL {
        match evidence.sources.get(&source) {
            Some(SourceEvidence::Records { records }) => {
                out.push_str(&format!("- {}: {} records\n", source, records.len()));
            }
            Some(SourceEvidence::Unavailable { error }) => {
                out.push_str(&format!("- {}: unavailable ({})\n", source, error));
            }
            None => {
                out.push_str(&format!("- {}: not collected\n", source));
            }
        }
    }
    out
}
