//! Trust evaluation over discovered referrers.
//!
//! Evidence is classified by keyword: each referrer's artifact type and
//! annotation values are matched case-insensitively. The score is a fixed
//! weighting of the signals found:
//!
//! | Signal | Weight |
//! |--------|--------|
//! | signature | 0.5 |
//! | SBOM | 0.2 |
//! | provenance | 0.2 |
//! | SLSA level (0-4) | 0.025 per level |

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::{Referrer, TrustPolicy, TrustVerificationReport};

/// Weights in basis points (1/10000), so sums are exact.
const SIGNATURE_WEIGHT_BP: u32 = 5_000;
const SBOM_WEIGHT_BP: u32 = 2_000;
const PROVENANCE_WEIGHT_BP: u32 = 2_000;
const SLSA_LEVEL_WEIGHT_BP: u32 = 250;
const MAX_SLSA_LEVEL: u8 = 4;

pub const MISSING_SIGNATURE: &str = "missing_or_invalid_signature";
pub const MISSING_SBOM: &str = "missing_sbom";
pub const MISSING_PROVENANCE: &str = "missing_provenance";

const SIGNATURE_KEYWORDS: &[&str] = &["cosign", "signature", "sigstore"];
const SBOM_KEYWORDS: &[&str] = &["spdx", "cyclonedx", "sbom"];
const PROVENANCE_KEYWORDS: &[&str] = &["provenance", "slsa", "in-toto"];

lazy_static! {
    static ref SLSA_LEVEL: Regex = Regex::new(r"(?i)slsa(?:[._\- ]level)?[=: ]+([0-9]+)").unwrap();
}

/// Evaluate the evidence attached to a digest against a policy.
pub fn evaluate_trust_report(referrers: &[Referrer], policy: &TrustPolicy) -> TrustVerificationReport {
    let signature_valid = referrers.iter().any(|r| matches_any(r, SIGNATURE_KEYWORDS));
    let sbom_present = referrers.iter().any(|r| matches_any(r, SBOM_KEYWORDS));
    let provenance_present = referrers.iter().any(|r| matches_any(r, PROVENANCE_KEYWORDS));
    let slsa_level = max_slsa_level(referrers);

    let mut strict_failures = Vec::new();
    if policy.strict_verify {
        if policy.require_signature && !signature_valid {
            strict_failures.push(MISSING_SIGNATURE.to_string());
        }
        if policy.require_sbom && !sbom_present {
            strict_failures.push(MISSING_SBOM.to_string());
        }
        if policy.require_provenance && !provenance_present {
            strict_failures.push(MISSING_PROVENANCE.to_string());
        }
    }

    TrustVerificationReport {
        signature_valid,
        sbom_present,
        provenance_present,
        slsa_level,
        trust_score: trust_score(signature_valid, sbom_present, provenance_present, slsa_level),
        strict_failures,
        referrers: referrers.to_vec(),
    }
}

/// Weighted score rounded to four decimals and capped at 1.0.
pub fn trust_score(signature: bool, sbom: bool, provenance: bool, slsa_level: Option<u8>) -> f64 {
    let mut bp = 0u32;
    if signature {
        bp += SIGNATURE_WEIGHT_BP;
    }
    if sbom {
        bp += SBOM_WEIGHT_BP;
    }
    if provenance {
        bp += PROVENANCE_WEIGHT_BP;
    }
    if let Some(level) = slsa_level {
        bp += u32::from(level.min(MAX_SLSA_LEVEL)) * SLSA_LEVEL_WEIGHT_BP;
    }

    f64::from(bp.min(10_000)) / 10_000.0
}

fn evidence_text(referrer: &Referrer) -> String {
    let mut text = referrer.artifact_type.to_lowercase();
    for value in referrer.annotations.values() {
        text.push(' ');
        text.push_str(&value.to_lowercase());
    }
    text
}

fn matches_any(referrer: &Referrer, keywords: &[&str]) -> bool {
    let text = evidence_text(referrer);
    keywords.iter().any(|k| text.contains(k))
}

fn max_slsa_level(referrers: &[Referrer]) -> Option<u8> {
    referrers
        .iter()
        .flat_map(|r| {
            std::iter::once(r.artifact_type.as_str()).chain(r.annotations.values().map(String::as_str))
        })
        .flat_map(|text| SLSA_LEVEL.captures_iter(text))
        .filter_map(|caps| caps.get(1))
        // Digit runs too long for u64 are still above the cap.
        .map(|digits| digits.as_str().parse::<u64>().unwrap_or(u64::MAX))
        .max()
        .map(|level| level.min(u64::from(MAX_SLSA_LEVEL)) as u8)
}
