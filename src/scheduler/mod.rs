//! Issuance scheduler
//!
//! Six cooperative stages move jobs and batches through the pipeline:
//!
//! | stage | trigger | work |
//! |-------|---------|------|
//! | P1 generate | polling | render/load PDF, hash, fingerprint |
//! | P2 sign intake | external call | validate signature, derive leaf |
//! | P3 intermediate | polling | per-batch Merkle tree, MRI + proofs |
//! | P4 ultimate | polling | cross-batch tree, anchor on chain |
//! | P5 QR artifact | polling | payload + PNG |
//! | P6 augment | polling | embed attachments, draw QR |
//!
//! Every polling loop is sequential per iteration, shares one shutdown
//! signal, and backs off briefly after a crashed iteration. All cross-stage
//! communication goes through the state store; the only in-process state is
//! the P1 dedup set and the bounded render pool.

mod augment;
mod generate;
mod intake;
mod intermediate;
mod qr_artifact;
mod ultimate;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::anchor::AnchorClient;
use crate::domain::{Batch, Job, JobId, QrLinkConfig, QrPayloadV2, Template, Tenant};
use crate::error::{IssuerError, Result};
use crate::infra::{CertificateRenderer, ShutdownSignal, StateStore, StorageGateway};
use crate::infra::shutdown::sleep_or_shutdown;
use crate::qr::QrRenderOptions;

/// Issuer-wide configuration shared by the stages
#[derive(Clone)]
pub struct IssuerConfig {
    /// Name written into Producer/Creator of augmented PDFs
    pub issuer_name: String,
    /// `ISSUER_PUBLIC_KEY` verification fallback
    pub env_issuer_public_key: Option<String>,
    pub qr_link: QrLinkConfig,
    /// Render options for the standalone QR artifact
    pub qr_artifact: QrRenderOptions,
    /// Render options for the QR drawn into PDFs
    pub qr_pdf: QrRenderOptions,
}

impl IssuerConfig {
    pub fn from_env() -> Self {
        Self {
            issuer_name: std::env::var("ISSUER_NAME").unwrap_or_else(|_| "Justifai".to_string()),
            env_issuer_public_key: std::env::var("ISSUER_PUBLIC_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            qr_link: QrLinkConfig::from_env(),
            qr_artifact: QrRenderOptions::artifact_from_env(),
            qr_pdf: QrRenderOptions::pdf_from_env(),
        }
    }
}

/// Collaborators handed to every stage; constructed once in the composition
/// root and shared by reference.
pub struct IssuerContext {
    pub store: Arc<dyn StateStore>,
    pub storage: Arc<dyn StorageGateway>,
    pub renderer: Arc<dyn CertificateRenderer>,
    pub anchor: Option<Arc<dyn AnchorClient>>,
    pub config: IssuerConfig,
}

/// Polling cadence and bounds
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub job_poll: Duration,
    pub mri_poll: Duration,
    pub mru_poll: Duration,
    pub qr_poll: Duration,
    pub augment_poll: Duration,
    /// Jobs claimed per P1 tick
    pub claim_limit: usize,
    /// Batches per ultimate set
    pub batch_limit: usize,
    /// Concurrent PDF renders (memory bound)
    pub pdf_concurrency: usize,
    pub render_timeout: Duration,
    /// How long P1 waits for in-flight jobs on shutdown
    pub drain_timeout: Duration,
    /// Pause after a crashed iteration
    pub crash_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            job_poll: Duration::from_millis(5000),
            mri_poll: Duration::from_millis(10_000),
            mru_poll: Duration::from_millis(15_000),
            qr_poll: Duration::from_millis(5000),
            augment_poll: Duration::from_millis(5000),
            claim_limit: 10,
            batch_limit: 25,
            pdf_concurrency: 2,
            render_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(30),
            crash_backoff: Duration::from_secs(5),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            job_poll: env_ms("JOB_POLL_INTERVAL_MS").unwrap_or(defaults.job_poll),
            mri_poll: env_ms("MRI_POLL_INTERVAL_MS").unwrap_or(defaults.mri_poll),
            mru_poll: env_ms("MRU_POLL_INTERVAL_MS").unwrap_or(defaults.mru_poll),
            qr_poll: env_ms("QR_POLL_INTERVAL_MS").unwrap_or(defaults.qr_poll),
            augment_poll: env_ms("PDF_AUGMENT_POLL_INTERVAL_MS").unwrap_or(defaults.augment_poll),
            pdf_concurrency: std::env::var("PDF_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.pdf_concurrency),
            ..defaults
        }
    }
}

fn env_ms(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
}

/// The scheduler; one instance per process.
pub struct IssuanceScheduler {
    ctx: Arc<IssuerContext>,
    config: SchedulerConfig,
    shutdown: ShutdownSignal,
    /// Jobs currently being generated; dedupes P1 retries within a tick
    in_flight: Arc<Mutex<HashSet<JobId>>>,
    render_pool: Arc<Semaphore>,
}

impl IssuanceScheduler {
    pub fn new(
        ctx: Arc<IssuerContext>,
        config: SchedulerConfig,
        shutdown: ShutdownSignal,
    ) -> Arc<Self> {
        let render_pool = Arc::new(Semaphore::new(config.pdf_concurrency));
        Arc::new(Self {
            ctx,
            config,
            shutdown,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            render_pool,
        })
    }

    pub fn context(&self) -> &Arc<IssuerContext> {
        &self.ctx
    }

    /// Spawn the five polling loops. P2 has no loop; it is driven by
    /// [`IssuanceScheduler::submit_signature`].
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            spawn_loop(self.clone(), "generate", self.config.job_poll, |s| async move {
                s.tick_generate().await
            }),
            spawn_loop(self.clone(), "intermediate", self.config.mri_poll, |s| async move {
                s.tick_intermediate().await
            }),
            spawn_loop(self.clone(), "ultimate", self.config.mru_poll, |s| async move {
                s.tick_ultimate().await
            }),
            spawn_loop(self.clone(), "qr-artifact", self.config.qr_poll, |s| async move {
                s.tick_qr().await
            }),
            spawn_loop(self.clone(), "pdf-augment", self.config.augment_poll, |s| async move {
                s.tick_augment().await
            }),
        ]
    }

    /// P1: claim pending jobs and generate their documents.
    pub async fn tick_generate(&self) -> Result<()> {
        generate::tick(self).await
    }

    /// P2: external signature intake.
    pub async fn submit_signature(&self, job_id: JobId, signature_hex: &str) -> Result<Job> {
        intake::submit_signature(&self.ctx, job_id, signature_hex).await
    }

    /// P3: build intermediate trees for fully signed batches.
    pub async fn tick_intermediate(&self) -> Result<()> {
        intermediate::tick(&self.ctx).await
    }

    /// P4: build the ultimate tree and anchor it.
    pub async fn tick_ultimate(&self) -> Result<()> {
        ultimate::tick(&self.ctx, self.config.batch_limit).await
    }

    /// P5: produce QR artifacts for anchored jobs.
    pub async fn tick_qr(&self) -> Result<()> {
        qr_artifact::tick(&self.ctx, self.config.claim_limit).await
    }

    /// P6: augment PDFs with attachments and the QR overlay.
    pub async fn tick_augment(&self) -> Result<()> {
        augment::tick(&self.ctx, self.config.claim_limit).await
    }

    /// Wait for in-flight P1 work to finish, bounded by the drain timeout.
    pub async fn drain(&self) {
        let deadline = tokio::time::Instant::now() + self.config.drain_timeout;
        loop {
            let remaining = self.in_flight.lock().expect("in-flight lock").len();
            if remaining == 0 {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(remaining, "drain timeout reached with jobs still in flight");
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub(crate) fn claim_in_flight(&self, job_id: JobId) -> bool {
        self.in_flight.lock().expect("in-flight lock").insert(job_id)
    }
}

fn spawn_loop<F, Fut>(
    scheduler: Arc<IssuanceScheduler>,
    name: &'static str,
    every: Duration,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<IssuanceScheduler>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        info!(worker = name, interval_ms = every.as_millis() as u64, "worker started");
        loop {
            if scheduler.shutdown.is_shutdown() {
                break;
            }
            let pause = match tick(scheduler.clone()).await {
                Ok(()) => every,
                Err(e) => {
                    warn!(worker = name, error = %e, "iteration failed; backing off");
                    jittered(scheduler.config.crash_backoff)
                }
            };
            if !sleep_or_shutdown(&scheduler.shutdown, pause).await {
                break;
            }
        }
        info!(worker = name, "worker stopped");
    })
}

/// Backoff with up to 50% jitter so crashed loops do not retry in lockstep.
fn jittered(base: Duration) -> Duration {
    use rand::Rng;
    let jitter = rand::thread_rng().gen_range(0.5..=1.5);
    base.mul_f64(jitter)
}

/// Job aggregate loaded for the artifact stages.
pub(crate) struct JobAggregate {
    pub job: Job,
    pub batch: Batch,
    pub template: Template,
    pub tenant: Tenant,
}

pub(crate) async fn load_aggregate(ctx: &IssuerContext, job: Job) -> Result<JobAggregate> {
    let batch = ctx
        .store
        .get_batch(job.batch_id)
        .await?
        .ok_or_else(|| IssuerError::Validation(format!("batch {} not found", job.batch_id)))?;
    let template = ctx
        .store
        .get_template(batch.template_id)
        .await?
        .ok_or_else(|| {
            IssuerError::Validation(format!("template {} not found", batch.template_id))
        })?;
    let tenant = ctx
        .store
        .get_tenant(batch.tenant_id)
        .await?
        .ok_or_else(|| IssuerError::Validation(format!("tenant {} not found", batch.tenant_id)))?;
    Ok(JobAggregate {
        job,
        batch,
        template,
        tenant,
    })
}

/// Payload, fragment, and content ladder for a job's QR code. P5 and P6
/// both call this so the artifact and the embedded image always agree.
pub(crate) fn qr_content_for(
    aggregate: &JobAggregate,
    config: &IssuerConfig,
) -> Result<(QrPayloadV2, String, String, Vec<String>)> {
    let payload = QrPayloadV2::build(
        &aggregate.job,
        &aggregate.batch,
        &aggregate.template,
        &aggregate.tenant,
    );
    let fragment = payload.encode_fragment()?;
    let content = config.qr_link.primary_content(&payload, &fragment);
    let fallbacks = config.qr_link.fallback_contents(&payload);
    Ok((payload, fragment, content, fallbacks))
}
