//! QR payload v2 codec
//!
//! The payload carries everything needed for offline verification. Proofs
//! store sibling hashes only; sorted-pair Merkle verification needs no
//! positions. The compressed link form is `base64url(deflateRaw(utf8(json)))`
//! without padding.

use std::io::{Read, Write};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::crypto::canonical::canonical_json_hash;
use crate::crypto::hash::to_hex;
use crate::error::IssuerError;

use super::{Batch, Job, Template, Tenant};

/// Version tag of the current payload format
pub const QR_PAYLOAD_VERSION: u32 = 2;

/// QR payload, version 2
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrPayloadV2 {
    pub v: u32,
    #[serde(rename = "jobId")]
    pub job_id: String,
    #[serde(rename = "batchId")]
    pub batch_id: String,
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    #[serde(rename = "templateId")]
    pub template_id: String,
    #[serde(rename = "templateHash")]
    pub template_hash: String,
    pub fields: Value,
    #[serde(rename = "fieldsHash")]
    pub fields_hash: String,
    #[serde(rename = "documentHash")]
    pub document_hash: Option<String>,
    #[serde(rename = "txHash")]
    pub tx_hash: Option<String>,
    pub network: Option<String>,
    #[serde(rename = "MPU")]
    pub mpu: Option<Vec<String>>,
    #[serde(rename = "MPI")]
    pub mpi: Option<Vec<String>>,
    #[serde(rename = "issuerId")]
    pub issuer_id: Option<String>,
    #[serde(rename = "issuerPublicKey")]
    pub issuer_public_key: Option<String>,
    #[serde(rename = "MRI")]
    pub mri: Option<String>,
    #[serde(rename = "MRU")]
    pub mru: Option<String>,
    #[serde(rename = "Ed")]
    pub ed: Option<i64>,
    #[serde(rename = "Ei")]
    pub ei: Option<i64>,
    #[serde(rename = "SI")]
    pub si: Option<String>,
}

impl QrPayloadV2 {
    /// Assemble the payload from the job aggregate.
    pub fn build(job: &Job, batch: &Batch, template: &Template, tenant: &Tenant) -> Self {
        let template_hash = template.content_hash();
        let fields = restrict_fields(&job.data, &template.parameters);
        let fields_hash = to_hex(&canonical_json_hash(&json!({
            "templateId": template.id.to_string(),
            "templateHash": template_hash,
            "fields": fields,
        })));

        let (ed, ei) = batch.expiry_epochs();

        Self {
            v: QR_PAYLOAD_VERSION,
            job_id: job.id.to_string(),
            batch_id: batch.id.to_string(),
            tenant_id: tenant.id.to_string(),
            template_id: template.id.to_string(),
            template_hash,
            fields,
            fields_hash,
            document_hash: job.document_hash.clone(),
            tx_hash: batch.tx_hash.clone(),
            network: batch.network.clone(),
            mpu: batch.merkle_proof_ultimate.clone(),
            mpi: job.merkle_proof_intermediate.clone(),
            issuer_id: Some(tenant.id.to_string()),
            issuer_public_key: batch
                .issuer_public_key
                .clone()
                .or_else(|| tenant.issuer_public_key.clone()),
            mri: batch.merkle_root.clone(),
            mru: batch.merkle_root_ultimate.clone(),
            ed: (ed != 0).then_some(ed),
            ei: (ei != 0).then_some(ei),
            si: job.issuer_signature.clone(),
        }
    }

    /// Compressed link fragment: `base64url(deflateRaw(json))`, no padding.
    pub fn encode_fragment(&self) -> Result<String, IssuerError> {
        let json = serde_json::to_vec(self)?;
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
        encoder
            .write_all(&json)
            .and_then(|_| encoder.finish())
            .map(|compressed| URL_SAFE_NO_PAD.encode(compressed))
            .map_err(|e| IssuerError::Validation(format!("payload compression failed: {e}")))
    }

    /// Inverse of [`QrPayloadV2::encode_fragment`].
    pub fn decode_fragment(fragment: &str) -> Result<Self, IssuerError> {
        let compressed = URL_SAFE_NO_PAD
            .decode(fragment)
            .map_err(|e| IssuerError::Validation(format!("payload base64 invalid: {e}")))?;
        let mut decoder = DeflateDecoder::new(compressed.as_slice());
        let mut json = Vec::new();
        decoder
            .read_to_end(&mut json)
            .map_err(|e| IssuerError::Validation(format!("payload inflate failed: {e}")))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// Restrict job data to the parameters the template declares; an empty
/// declaration accepts the whole input.
fn restrict_fields(data: &Value, parameters: &[String]) -> Value {
    if parameters.is_empty() {
        return data.clone();
    }
    let source = match data.as_object() {
        Some(map) => map,
        None => return data.clone(),
    };
    let mut out = Map::new();
    for name in parameters {
        if let Some(value) = source.get(name) {
            out.insert(name.clone(), value.clone());
        }
    }
    Value::Object(out)
}

/// QR content strategy: short URL when a verify base is configured, the
/// full compressed payload otherwise.
#[derive(Debug, Clone)]
pub struct QrLinkConfig {
    /// Portal base for short `?jobId=` links; enables the short form
    pub verify_base_url: Option<String>,
    /// Base for full-payload links
    pub verify_qr_base_url: Option<String>,
}

impl QrLinkConfig {
    pub const DEFAULT_BASE: &'static str = "https://verify.justifai.io";

    pub fn from_env() -> Self {
        Self {
            verify_base_url: std::env::var("VERIFY_BASE_URL").ok().filter(|s| !s.is_empty()),
            verify_qr_base_url: std::env::var("VERIFY_QR_BASE_URL")
                .ok()
                .filter(|s| !s.is_empty()),
        }
    }

    /// Primary QR content for a payload.
    pub fn primary_content(
        &self,
        payload: &QrPayloadV2,
        fragment: &str,
    ) -> String {
        match &self.verify_base_url {
            Some(base) => format!("{}/verify?jobId={}", base.trim_end_matches('/'), payload.job_id),
            None => {
                let base = self
                    .verify_qr_base_url
                    .as_deref()
                    .unwrap_or(Self::DEFAULT_BASE);
                format!("{}/verify?p={}", base.trim_end_matches('/'), fragment)
            }
        }
    }

    /// Fallback ladder when the primary content does not fit a QR code:
    /// portal URL with the job id, then minimal JSON.
    pub fn fallback_contents(&self, payload: &QrPayloadV2) -> Vec<String> {
        let base = self
            .verify_base_url
            .as_deref()
            .or(self.verify_qr_base_url.as_deref())
            .unwrap_or(Self::DEFAULT_BASE);
        vec![
            format!("{}/verify?jobId={}", base.trim_end_matches('/'), payload.job_id),
            json!({ "jobId": payload.job_id }).to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TemplateId, TenantId};

    fn fixture() -> (Job, Batch, Template, Tenant) {
        let tenant = Tenant::new("acme");
        let mut template = Template::new(tenant.id, "cert", "<h1>{{name}}</h1>");
        template.parameters = vec!["name".to_string()];

        let mut batch = Batch::new(tenant.id, template.id);
        batch.merkle_root = Some("aa".repeat(32));
        batch.merkle_root_ultimate = Some("bb".repeat(32));
        batch.merkle_proof_ultimate = Some(vec!["cc".repeat(32)]);
        batch.tx_hash = Some("dd".repeat(32));
        batch.network = Some("polygon-amoy".to_string());

        let mut job = Job::new(batch.id, json!({"name": "A", "secret": "drop me"}));
        job.document_hash = Some("11".repeat(32));
        job.issuer_signature = Some("22".repeat(64));
        job.merkle_proof_intermediate = Some(vec!["33".repeat(32)]);

        (job, batch, template, tenant)
    }

    #[test]
    fn test_fields_restricted_to_declared_parameters() {
        let (job, batch, template, tenant) = fixture();
        let payload = QrPayloadV2::build(&job, &batch, &template, &tenant);
        assert_eq!(payload.fields, json!({"name": "A"}));
    }

    #[test]
    fn test_undeclared_parameters_pass_everything() {
        let (job, batch, mut template, tenant) = fixture();
        template.parameters.clear();
        let payload = QrPayloadV2::build(&job, &batch, &template, &tenant);
        assert_eq!(payload.fields, job.data);
    }

    #[test]
    fn test_exact_wire_keys() {
        let (job, batch, template, tenant) = fixture();
        let payload = QrPayloadV2::build(&job, &batch, &template, &tenant);
        let value = serde_json::to_value(&payload).unwrap();
        let map = value.as_object().unwrap();

        for key in [
            "v", "jobId", "batchId", "tenantId", "templateId", "templateHash", "fields",
            "fieldsHash", "documentHash", "txHash", "network", "MPU", "MPI", "issuerId",
            "issuerPublicKey", "MRI", "MRU", "Ed", "Ei", "SI",
        ] {
            assert!(map.contains_key(key), "missing key {key}");
        }
        assert_eq!(map["v"], json!(2));
        assert!(map["Ed"].is_null());
    }

    #[test]
    fn test_fields_hash_tracks_content() {
        let (mut job, batch, template, tenant) = fixture();
        let first = QrPayloadV2::build(&job, &batch, &template, &tenant);
        job.data = json!({"name": "B"});
        let second = QrPayloadV2::build(&job, &batch, &template, &tenant);
        assert_ne!(first.fields_hash, second.fields_hash);
    }

    #[test]
    fn test_fragment_round_trip() {
        let (job, batch, template, tenant) = fixture();
        let payload = QrPayloadV2::build(&job, &batch, &template, &tenant);
        let fragment = payload.encode_fragment().unwrap();

        // base64url alphabet, no padding
        assert!(!fragment.contains('='));
        assert!(!fragment.contains('+'));
        assert!(!fragment.contains('/'));

        let decoded = QrPayloadV2::decode_fragment(&fragment).unwrap();
        assert_eq!(decoded.job_id, payload.job_id);
        assert_eq!(decoded.fields_hash, payload.fields_hash);
        assert_eq!(decoded.mpu, payload.mpu);
        assert_eq!(decoded.si, payload.si);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(QrPayloadV2::decode_fragment("!!!not-base64!!!").is_err());
        assert!(QrPayloadV2::decode_fragment("aGVsbG8").is_err()); // inflates to nothing useful
    }

    #[test]
    fn test_short_link_when_base_configured() {
        let (job, batch, template, tenant) = fixture();
        let payload = QrPayloadV2::build(&job, &batch, &template, &tenant);
        let config = QrLinkConfig {
            verify_base_url: Some("https://portal.example/".to_string()),
            verify_qr_base_url: None,
        };
        let content = config.primary_content(&payload, "unused");
        assert_eq!(
            content,
            format!("https://portal.example/verify?jobId={}", payload.job_id)
        );
    }

    #[test]
    fn test_full_payload_link_otherwise() {
        let (job, batch, template, tenant) = fixture();
        let payload = QrPayloadV2::build(&job, &batch, &template, &tenant);
        let fragment = payload.encode_fragment().unwrap();
        let config = QrLinkConfig {
            verify_base_url: None,
            verify_qr_base_url: None,
        };
        let content = config.primary_content(&payload, &fragment);
        assert!(content.starts_with("https://verify.justifai.io/verify?p="));
        assert!(content.ends_with(&fragment));
    }

    #[test]
    fn test_fallback_ladder_shapes() {
        let (job, batch, template, tenant) = fixture();
        let payload = QrPayloadV2::build(&job, &batch, &template, &tenant);
        let config = QrLinkConfig {
            verify_base_url: None,
            verify_qr_base_url: None,
        };
        let fallbacks = config.fallback_contents(&payload);
        assert_eq!(fallbacks.len(), 2);
        assert!(fallbacks[0].contains("jobId="));
        let minimal: Value = serde_json::from_str(&fallbacks[1]).unwrap();
        assert_eq!(minimal["jobId"], json!(payload.job_id));
    }
}
