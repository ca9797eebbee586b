//! Verifier-focused tests: bundle round-trips, degraded paths, tampering.

mod common;

use justifai_issuer::crypto::fingerprint::Fingerprint;
use justifai_issuer::crypto::hash::{hex_to_bytes, keccak256, to_hex};
use justifai_issuer::crypto::signing::{public_key_for_private, sign_prehash};
use justifai_issuer::domain::merkle::{hash_pair, padding_leaf};
use justifai_issuer::domain::VerificationBundle;
use justifai_issuer::infra::{BasicPdfRenderer, CertificateRenderer};
use justifai_issuer::pdf::augment::{augment_pdf, AugmentRequest};
use justifai_issuer::pdf::verify::{PdfVerifier, StepStatus, VerifierOptions};
use justifai_issuer::qr::{render_png, QrRenderOptions};
use justifai_issuer::QrPlacement;

use common::TEST_SIGNING_KEY;

/// Manual offline issuance: single job, single batch, no chain.
async fn issue_offline(holder: &str, document_hash_override: Option<&str>) -> Vec<u8> {
    let original = BasicPdfRenderer
        .render(&format!("<h1>Certificate</h1><p>Issued to {holder}</p>"))
        .await
        .unwrap();

    let real_hash = keccak256(&original);
    let claimed_hash_hex = document_hash_override
        .map(str::to_string)
        .unwrap_or_else(|| to_hex(&real_hash));

    // Fingerprint over the claimed hash, lifetime expiries.
    let fingerprint = Fingerprint::from_parts(&claimed_hash_hex, 0, 0).unwrap();
    let signature = sign_prehash(&fingerprint.hash_hex(), TEST_SIGNING_KEY).unwrap();
    let leaf = keccak256(&hex_to_bytes(&signature).unwrap());

    // Single-leaf intermediate tree; padded single-batch ultimate tree.
    let mri = leaf;
    let mru = hash_pair(&mri, &padding_leaf(&mri));

    let bundle = VerificationBundle {
        document_hash: Some(claimed_hash_hex),
        document_fingerprint: Some(fingerprint.to_hex()),
        fingerprint_hash: Some(fingerprint.hash_hex()),
        issuer_signature: Some(signature),
        merkle_leaf: Some(to_hex(&leaf)),
        expiry_date: None,
        invalidation_expiry: None,
        issuer_id: Some("tenant-1".to_string()),
        issuer_public_key: Some(public_key_for_private(TEST_SIGNING_KEY).unwrap()),
        merkle_proof_intermediate: Some(vec![]),
        merkle_root_intermediate: Some(to_hex(&mri)),
        merkle_root_ultimate: Some(to_hex(&mru)),
        merkle_proof_ultimate: Some(vec![to_hex(&padding_leaf(&mri))]),
        tx_hash: None,
        network: None,
    };

    let qr = render_png("https://verify.test/?jobId=offline", &QrRenderOptions::default()).unwrap();
    augment_pdf(&AugmentRequest {
        original_pdf: &original,
        bundle_json: &bundle.to_json_bytes(),
        qr_png: &qr,
        placement: QrPlacement::default(),
        issuer_name: "Justifai",
    })
    .unwrap()
}

fn verifier() -> PdfVerifier {
    PdfVerifier::new(
        None,
        VerifierOptions {
            env_issuer_public_key: None,
            issuer_name: Some("Justifai".to_string()),
        },
    )
}

#[tokio::test]
async fn offline_issuance_verifies_without_chain() {
    let augmented = issue_offline("Alice", None).await;
    let report = verifier().verify(&augmented, None).await;

    assert!(
        report.valid,
        "errors={:?} warnings={:?}",
        report.errors, report.warnings
    );
    assert_eq!(report.steps["document_hash"].status, StepStatus::Passed);
    assert_eq!(report.steps["signature"].status, StepStatus::Passed);
    assert_eq!(report.steps["merkle_intermediate"].status, StepStatus::Passed);
    assert_eq!(report.steps["merkle_ultimate"].status, StepStatus::Passed);
    // No txHash: anchored-later documents warn instead of failing.
    assert_eq!(report.steps["chain_anchor"].status, StepStatus::Warning);
}

#[tokio::test]
async fn text_tamper_is_rejected() {
    let augmented = issue_offline("Alice", None).await;

    // Same-length text substitution inside the page content stream.
    let needle = b"Alice";
    let position = augmented
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("holder name present in content stream");
    let mut tampered = augmented.clone();
    tampered[position..position + needle.len()].copy_from_slice(b"Malic");

    let report = verifier().verify(&tampered, None).await;
    assert!(!report.valid);
    assert_eq!(report.steps["integrity_text"].status, StepStatus::Failed);
    // The embedded original is untouched, so the crypto chain still holds.
    assert_eq!(report.steps["signature"].status, StepStatus::Passed);
}

#[tokio::test]
async fn incremental_update_raises_startxref_warning() {
    let augmented = issue_offline("Alice", None).await;

    // A trailing update skeleton adds a second marker. The appended
    // startxref repeats the real xref offset so the file stays readable.
    let text = String::from_utf8_lossy(&augmented);
    let marker = text.rfind("startxref").unwrap();
    let offset_line: String = text[marker + "startxref".len()..]
        .chars()
        .skip_while(|c| c.is_whitespace())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let mut appended = augmented.clone();
    appended.extend_from_slice(format!("\nstartxref\n{offset_line}\n%%EOF\n").as_bytes());

    let report = verifier().verify(&appended, None).await;
    assert_eq!(
        report.steps["integrity_startxref"].status,
        StepStatus::Warning
    );
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("startxref")));
}

#[tokio::test]
async fn document_hash_mismatch_is_a_warning_not_an_error() {
    // The bundle claims a different document hash, but the rest of the
    // chain is consistent with the claim.
    let wrong_hash = to_hex(&keccak256(b"some other document"));
    let augmented = issue_offline("Alice", Some(&wrong_hash)).await;

    let report = verifier().verify(&augmented, None).await;
    assert_eq!(report.steps["document_hash"].status, StepStatus::Warning);
    assert!(report.warnings.iter().any(|w| w.contains("document hash mismatch")));
    // Deliberate policy: this alone does not reject the document.
    assert!(report.valid, "errors={:?}", report.errors);
}

#[tokio::test]
async fn missing_original_continues_with_warning() {
    use lopdf::{dictionary, Document, Object};

    // A PDF whose bundle lives in legacy Subject metadata and that carries
    // no embedded original.
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    // Leaf/roots consistent, no key, no document hash: every step that can
    // run still runs.
    let signature = "ab".repeat(64);
    let leaf = keccak256(&hex_to_bytes(&signature).unwrap());
    let bundle = serde_json::json!({
        "issuerSignature": signature,
        "merkleLeaf": to_hex(&leaf),
        "merkleProofIntermediate": [],
        "merkleRootIntermediate": to_hex(&leaf),
        "merkleRootUltimate": to_hex(&leaf),
        "merkleProofUltimate": [],
    });
    let info_id = doc.add_object(dictionary! {
        "Subject" => Object::string_literal(bundle.to_string()),
    });
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();

    let report = verifier().verify(&bytes, None).await;

    assert_eq!(
        report.steps["extract_original"].status,
        StepStatus::Warning
    );
    assert_eq!(report.steps["signature"].status, StepStatus::Warning);
    assert_eq!(report.steps["merkle_leaf"].status, StepStatus::Passed);
    // MRI == MRU: the empty-proof identity case.
    assert_eq!(report.steps["merkle_ultimate"].status, StepStatus::Passed);
    assert!(report.valid, "errors={:?}", report.errors);
    assert!(!report.warnings.is_empty());
}

#[tokio::test]
async fn wrong_leaf_in_bundle_is_rejected() {
    let augmented = issue_offline("Alice", None).await;

    // Re-augment with a bundle whose leaf is wrong: parse the attachment,
    // flip it, rebuild.
    let doc = lopdf::Document::load_mem(&augmented).unwrap();
    let original = justifai_issuer::pdf::extract::extract_original_pdf(&doc).unwrap();
    let (mut bundle, _) = justifai_issuer::pdf::extract::extract_bundle(&doc).unwrap();
    bundle.merkle_leaf = Some("00".repeat(32));

    let qr = render_png("https://verify.test/?jobId=x", &QrRenderOptions::default()).unwrap();
    let rebuilt = augment_pdf(&AugmentRequest {
        original_pdf: &original,
        bundle_json: &bundle.to_json_bytes(),
        qr_png: &qr,
        placement: QrPlacement::default(),
        issuer_name: "Justifai",
    })
    .unwrap();

    let report = verifier().verify(&rebuilt, None).await;
    assert!(!report.valid);
    assert_eq!(report.steps["merkle_leaf"].status, StepStatus::Failed);
}
