//! Verification pipeline
//!
//! Inverts the whole issuance chain from nothing but the candidate PDF
//! bytes: recover the embedded original and bundle, recompute every hash,
//! verify the issuer signature, walk both Merkle proofs, check the on-chain
//! anchor, and run the tamper heuristics against the carrying file.
//!
//! Failures split into errors (reject) and warnings (accept with caveat):
//! a PDF with an unverifiable anchor is rejected, one whose embedded
//! original cannot be recovered continues against the outer PDF with a
//! warning.

use std::collections::BTreeMap;
use std::sync::Arc;

use lopdf::Document;
use serde::Serialize;
use tracing::debug;

use crate::anchor::AnchorClient;
use crate::crypto::fingerprint::{parse_expiry, Fingerprint};
use crate::crypto::hash::{hex_to_bytes, hex_to_hash, keccak256, to_hex};
use crate::crypto::signing::verify_prehash;
use crate::domain::merkle::verify_proof;
use crate::domain::{QrPayloadV2, VerificationBundle};

use super::{extract, text};

/// Maximum tolerated Creation/ModDate divergence, seconds
const MAX_DATE_DELTA_SECS: i64 = 60;

/// Per-step outcome in the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    Warning,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Full verification result
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub steps: BTreeMap<&'static str, StepOutcome>,
}

impl VerificationReport {
    fn new() -> Self {
        Self {
            valid: false,
            errors: Vec::new(),
            warnings: Vec::new(),
            steps: BTreeMap::new(),
        }
    }

    fn pass(&mut self, step: &'static str) {
        self.steps.insert(
            step,
            StepOutcome {
                status: StepStatus::Passed,
                detail: None,
            },
        );
    }

    fn fail(&mut self, step: &'static str, message: impl Into<String>) {
        let message = message.into();
        self.steps.insert(
            step,
            StepOutcome {
                status: StepStatus::Failed,
                detail: Some(message.clone()),
            },
        );
        self.errors.push(message);
    }

    fn warn(&mut self, step: &'static str, message: impl Into<String>) {
        let message = message.into();
        self.steps.insert(
            step,
            StepOutcome {
                status: StepStatus::Warning,
                detail: Some(message.clone()),
            },
        );
        self.warnings.push(message);
    }

    fn skip(&mut self, step: &'static str, message: impl Into<String>) {
        self.steps.insert(
            step,
            StepOutcome {
                status: StepStatus::Skipped,
                detail: Some(message.into()),
            },
        );
    }
}

/// Verifier configuration
#[derive(Clone, Default)]
pub struct VerifierOptions {
    /// `ISSUER_PUBLIC_KEY` fallback, lowest priority
    pub env_issuer_public_key: Option<String>,
    /// Accepted Producer strings beyond the library default
    pub issuer_name: Option<String>,
}

pub struct PdfVerifier {
    anchor: Option<Arc<dyn AnchorClient>>,
    options: VerifierOptions,
}

impl PdfVerifier {
    pub fn new(anchor: Option<Arc<dyn AnchorClient>>, options: VerifierOptions) -> Self {
        Self { anchor, options }
    }

    /// Run the full pipeline over candidate PDF bytes. A QR payload, when
    /// the caller scanned one, supplies the second-priority issuer key.
    pub async fn verify(
        &self,
        pdf_bytes: &[u8],
        qr_payload: Option<&QrPayloadV2>,
    ) -> VerificationReport {
        let mut report = VerificationReport::new();

        let outer = match Document::load_mem(pdf_bytes) {
            Ok(doc) => doc,
            Err(e) => {
                report.fail("parse", format!("candidate is not a readable PDF: {e}"));
                return report;
            }
        };
        report.pass("parse");

        // 1. Embedded original
        let original_bytes = extract::extract_original_pdf(&outer);
        let original_doc = match &original_bytes {
            Some(bytes) => {
                report.pass("extract_original");
                Document::load_mem(bytes).ok()
            }
            None => {
                report.warn(
                    "extract_original",
                    "embedded original PDF not found; verifying against the outer document",
                );
                None
            }
        };

        // 2. Verification bundle
        let bundle = match extract::extract_bundle(&outer) {
            Some((bundle, _)) => {
                report.pass("extract_bundle");
                bundle
            }
            None => {
                report.fail(
                    "extract_bundle",
                    "no verification bundle found in attachments or metadata",
                );
                return report;
            }
        };

        // 3. Document hash over the recovered original (or the outer file)
        let hashed_bytes: &[u8] = original_bytes.as_deref().unwrap_or(pdf_bytes);
        let computed_document_hash = to_hex(&keccak256(hashed_bytes));
        match &bundle.document_hash {
            Some(expected) if expected.eq_ignore_ascii_case(&computed_document_hash) => {
                report.pass("document_hash");
            }
            Some(expected) => {
                // Deliberately a warning: the original may be unrecoverable
                // while the rest of the chain still proves out.
                report.warn(
                    "document_hash",
                    format!(
                        "document hash mismatch (bundle {expected}, computed {computed_document_hash})"
                    ),
                );
            }
            None => report.skip("document_hash", "bundle carries no documentHash"),
        }

        // 4. Rebuild the fingerprint and its hash
        let document_hash_for_di = bundle
            .document_hash
            .clone()
            .unwrap_or_else(|| computed_document_hash.clone());
        let fingerprint_hash_hex = match hex_to_hash(&document_hash_for_di) {
            Some(document_hash) => {
                let ed = bundle
                    .expiry_date
                    .as_deref()
                    .and_then(parse_expiry)
                    .unwrap_or(0);
                let ei = bundle
                    .invalidation_expiry
                    .as_deref()
                    .and_then(parse_expiry)
                    .unwrap_or(0);
                let fingerprint = Fingerprint::new(document_hash, ed, ei);
                let hash_hex = fingerprint.hash_hex();

                let di_matches = bundle
                    .document_fingerprint
                    .as_deref()
                    .map(|expected| expected.eq_ignore_ascii_case(&fingerprint.to_hex()))
                    .unwrap_or(true);
                let hash_matches = bundle
                    .fingerprint_hash
                    .as_deref()
                    .map(|expected| expected.eq_ignore_ascii_case(&hash_hex))
                    .unwrap_or(true);

                if di_matches && hash_matches {
                    report.pass("fingerprint");
                } else {
                    report.fail(
                        "fingerprint",
                        "recomputed fingerprint does not match the bundle",
                    );
                }
                hash_hex
            }
            None => {
                report.fail("fingerprint", "bundle documentHash is not valid hex");
                return report;
            }
        };

        // 5. Issuer signature, key priority: bundle > QR payload > env
        let issuer_key = bundle
            .issuer_public_key
            .clone()
            .or_else(|| qr_payload.and_then(|p| p.issuer_public_key.clone()))
            .or_else(|| self.options.env_issuer_public_key.clone());

        let signature = bundle.issuer_signature.clone();
        match (&signature, &issuer_key) {
            (Some(signature), Some(key)) => {
                if verify_prehash(&fingerprint_hash_hex, signature, key) {
                    report.pass("signature");
                } else {
                    report.fail("signature", "issuer signature does not verify");
                }
            }
            (Some(_), None) => {
                report.warn("signature", "no issuer public key available; signature skipped");
            }
            (None, _) => {
                report.fail("signature", "bundle carries no issuer signature");
            }
        }

        // 6. Merkle leaf from the signature
        let leaf = signature
            .as_deref()
            .and_then(hex_to_bytes)
            .map(|bytes| keccak256(&bytes));
        match (&leaf, &bundle.merkle_leaf) {
            (Some(leaf), Some(expected)) if expected.eq_ignore_ascii_case(&to_hex(leaf)) => {
                report.pass("merkle_leaf");
            }
            (Some(_), Some(_)) => {
                report.fail("merkle_leaf", "leaf does not equal keccak256 of the signature");
            }
            _ => report.skip("merkle_leaf", "signature or merkleLeaf missing"),
        }

        // 7. Intermediate proof
        let mri = bundle.merkle_root_intermediate.as_deref().and_then(hex_to_hash);
        match (&leaf, &mri) {
            (Some(leaf), Some(mri)) => {
                let proof = decode_proof(bundle.merkle_proof_intermediate.as_deref());
                match proof {
                    Some(proof) if verify_proof(leaf, &proof, mri) => {
                        report.pass("merkle_intermediate")
                    }
                    Some(_) => report.fail(
                        "merkle_intermediate",
                        "intermediate proof does not reach the intermediate root",
                    ),
                    None => report.fail(
                        "merkle_intermediate",
                        "intermediate proof is missing or malformed",
                    ),
                }
            }
            _ => report.fail(
                "merkle_intermediate",
                "merkle leaf or intermediate root unavailable",
            ),
        }

        // 8. Ultimate proof; MRI == MRU with an empty proof is the
        //    single-batch identity case.
        let mru = bundle.merkle_root_ultimate.as_deref().and_then(hex_to_hash);
        match (&mri, &mru) {
            (Some(mri), Some(mru)) => {
                let proof = decode_proof(bundle.merkle_proof_ultimate.as_deref())
                    .unwrap_or_default();
                if verify_proof(mri, &proof, mru) {
                    report.pass("merkle_ultimate");
                } else {
                    report.fail(
                        "merkle_ultimate",
                        "ultimate proof does not reach the ultimate root",
                    );
                }
            }
            _ => report.fail("merkle_ultimate", "intermediate or ultimate root unavailable"),
        }

        // 9. On-chain anchor
        match (&self.anchor, &bundle.tx_hash, &mru) {
            (Some(anchor), Some(tx_hash), Some(mru)) => {
                match anchor.verify_transaction(tx_hash, Some(mru)).await {
                    Ok(result) if result.verified => report.pass("chain_anchor"),
                    Ok(result) => report.fail(
                        "chain_anchor",
                        format!(
                            "anchor transaction check failed (matches: {:?}, event root: {:?})",
                            result.mru_matches, result.mru_from_event
                        ),
                    ),
                    Err(e) => report.fail("chain_anchor", format!("anchor lookup failed: {e}")),
                }
            }
            (None, _, _) => report.skip("chain_anchor", "no chain client configured"),
            (_, None, _) => report.warn("chain_anchor", "bundle carries no txHash"),
            (_, _, None) => report.fail("chain_anchor", "no ultimate root to check on chain"),
        }

        // 10. Content-integrity heuristics
        self.content_integrity(&mut report, pdf_bytes, &outer, original_doc.as_ref());

        report.valid = report.errors.is_empty();
        debug!(
            valid = report.valid,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "verification finished"
        );
        report
    }

    fn content_integrity(
        &self,
        report: &mut VerificationReport,
        outer_bytes: &[u8],
        outer: &Document,
        original: Option<&Document>,
    ) {
        // (e) exactly one startxref marker
        let startxrefs = text::count_startxref(outer_bytes);
        if startxrefs > 1 {
            report.warn(
                "integrity_startxref",
                format!("{startxrefs} startxref markers indicate incremental edits"),
            );
        } else {
            report.pass("integrity_startxref");
        }

        // (f) Producer is the issuer or the library default
        let producer = text::info_string(outer, b"Producer").unwrap_or_default();
        let known_issuer = self
            .options
            .issuer_name
            .as_deref()
            .map(|name| producer == name)
            .unwrap_or(false);
        if known_issuer || producer.to_ascii_lowercase().contains("lopdf") {
            report.pass("integrity_producer");
        } else {
            report.warn(
                "integrity_producer",
                format!("unexpected Producer {producer:?}"),
            );
        }

        // (d) Creation/Mod date drift
        let creation = text::info_string(outer, b"CreationDate").and_then(|s| text::parse_pdf_date(&s));
        let modified = text::info_string(outer, b"ModDate").and_then(|s| text::parse_pdf_date(&s));
        match (creation, modified) {
            (Some(created), Some(modified)) => {
                let delta = (modified - created).num_seconds().abs();
                if delta <= MAX_DATE_DELTA_SECS {
                    report.pass("integrity_dates");
                } else {
                    report.warn(
                        "integrity_dates",
                        format!("Creation/ModDate differ by {delta}s"),
                    );
                }
            }
            _ => report.warn("integrity_dates", "document dates missing or unparsable"),
        }

        let original = match original {
            Some(original) => original,
            None => {
                report.skip(
                    "integrity_content",
                    "no embedded original to compare against",
                );
                return;
            }
        };

        // (a) text layer equality under whitespace normalization
        let outer_text = text::normalized_text(outer);
        let original_text = text::normalized_text(original);
        if outer_text == original_text {
            report.pass("integrity_text");
        } else {
            report.fail(
                "integrity_text",
                "visible text differs from the embedded original",
            );
        }

        // (b) at most one extra annotation (the marker)
        let annotation_delta =
            text::count_annotations(outer) as i64 - text::count_annotations(original) as i64;
        if annotation_delta > 1 {
            report.fail(
                "integrity_annotations",
                format!("{annotation_delta} annotations added beyond the marker"),
            );
        } else {
            report.pass("integrity_annotations");
        }

        // (c) at most one extra image (the QR)
        let image_delta = text::count_images(outer) as i64 - text::count_images(original) as i64;
        if image_delta > 1 {
            report.fail(
                "integrity_images",
                format!("{image_delta} images added beyond the QR"),
            );
        } else {
            report.pass("integrity_images");
        }

        report.pass("integrity_content");
    }
}

fn decode_proof(proof: Option<&[String]>) -> Option<Vec<crate::crypto::hash::Hash256>> {
    let proof = proof?;
    proof.iter().map(|entry| hex_to_hash(entry)).collect()
}
