//! Sweepers - best-effort removal of objects leaked by acceptance runs
//!
//! Each sweeper lists candidate objects in the configured folder and
//! deletes them one by one with bounded retries. Sweepers run after the
//! sweepers they depend on; an object that is already gone counts as swept.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;
use ycloud_core::config::ProviderConfig;
use ycloud_core::error::{ApiCode, ApiError};
use ycloud_core::operation::{Operation, OperationWaiter, WaitError, WaitOptions};
use ycloud_core::retry::retry_attempts;

use crate::api::types::{
    BillableObject, UpdateAsymmetricKeyRequest, UpdateClickHouseClusterRequest,
};
use crate::resources::{
    Clients, billing_cloud_binding, kms_asymmetric_encryption_key, mdb_clickhouse_cluster,
    storage_bucket,
};
use crate::utils;

/// Pause between attempts on one object
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

const KMS_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const CLICKHOUSE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const BILLING_TIMEOUT: Duration = Duration::from_secs(60);

/// Accounts the billing sweeper moves test clouds between
pub const BILLING_ACCOUNT_FROM_ENV: &str = "YC_BILLING_TEST_ACCOUNT_ID_1";
pub const BILLING_ACCOUNT_TO_ENV: &str = "YC_BILLING_TEST_ACCOUNT_ID_2";

/// An object a sweeper may remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaked {
    pub id: String,
    pub name: String,
}

impl Leaked {
    fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One object that survived every attempt
#[derive(Debug, Clone, PartialEq)]
pub struct SweepFailure {
    pub sweeper: &'static str,
    pub object: String,
    pub message: String,
}

impl fmt::Display for SweepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.sweeper, self.object, self.message)
    }
}

fn list_failures(failures: &[SweepFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("  {}", f))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("unknown sweeper '{0}'")]
    UnknownSweeper(String),

    #[error("sweeper '{sweeper}' depends on unknown sweeper '{dependency}'")]
    MissingDependency {
        sweeper: &'static str,
        dependency: &'static str,
    },

    #[error("sweeper dependency cycle through '{0}'")]
    Cycle(&'static str),

    #[error("failed to sweep {} object(s):\n{}", .0.len(), list_failures(.0))]
    Failed(Vec<SweepFailure>),
}

/// Objects removed per sweeper
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub swept: BTreeMap<&'static str, usize>,
}

/// What every sweeper call shares
#[derive(Clone, Copy)]
pub struct SweepContext<'a> {
    pub config: &'a ProviderConfig,
    pub clients: &'a Clients,
    pub cancel: &'a CancellationToken,
}

impl SweepContext<'_> {
    fn folder_id(&self) -> Result<String, ApiError> {
        self.config
            .folder_id_for(None)
            .map_err(|e| ApiError::new(ApiCode::InvalidArgument, e.message))
    }

    /// Wait for the operation a sweep call started
    ///
    /// A call or operation that fails with not-found has nothing left to do.
    async fn finish(
        &self,
        submitted: Result<Operation, ApiError>,
        timeout: Duration,
    ) -> Result<(), ApiError> {
        let operation = match submitted {
            Ok(operation) => operation,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        let options = WaitOptions {
            poll_interval: self.config.poll_interval,
            timeout,
            max_poll_retries: self.config.max_retries,
        };
        match OperationWaiter::new(self.clients.operations.as_ref(), options)
            .wait(operation, self.cancel)
            .await
        {
            Ok(_) => Ok(()),
            Err(WaitError::Failed { code, .. }) if code == ApiCode::NotFound => Ok(()),
            Err(WaitError::Failed { code, message, .. }) => Err(ApiError::new(code, message)),
            Err(WaitError::Poll { source, .. }) => Err(source),
            Err(e @ WaitError::TimedOut { .. }) => {
                Err(ApiError::new(ApiCode::DeadlineExceeded, e.to_string()))
            }
            Err(e @ WaitError::Cancelled { .. }) => {
                Err(ApiError::new(ApiCode::Cancelled, e.to_string()))
            }
        }
    }
}

#[async_trait]
pub trait Sweeper: Send + Sync {
    /// Resource type the sweeper cleans up
    fn name(&self) -> &'static str;

    /// Sweepers that must run first
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    async fn list(&self, ctx: &SweepContext<'_>) -> Result<Vec<Leaked>, ApiError>;

    async fn sweep(&self, ctx: &SweepContext<'_>, object: &Leaked) -> Result<(), ApiError>;
}

/// Empties buckets of every object version and deletes them
pub struct BucketSweeper;

#[async_trait]
impl Sweeper for BucketSweeper {
    fn name(&self) -> &'static str {
        storage_bucket::RESOURCE_TYPE
    }

    /// Clusters may still write backups into test buckets
    fn dependencies(&self) -> &'static [&'static str] {
        &[mdb_clickhouse_cluster::RESOURCE_TYPE]
    }

    async fn list(&self, ctx: &SweepContext<'_>) -> Result<Vec<Leaked>, ApiError> {
        let s3 = ctx.clients.objects.client(None)?;
        Ok(s3
            .list_buckets()
            .await?
            .into_iter()
            .map(|name| Leaked::new(name.clone(), name))
            .collect())
    }

    async fn sweep(&self, ctx: &SweepContext<'_>, object: &Leaked) -> Result<(), ApiError> {
        let s3 = ctx.clients.objects.client(None)?;
        let bucket = object.id.as_str();
        let result = async {
            let versions = s3.list_object_versions(bucket).await?;
            if !versions.is_empty() {
                debug!("{}: deleting {} object versions", bucket, versions.len());
                s3.delete_objects(bucket, &versions).await?;
            }
            s3.delete_bucket(bucket).await
        }
        .await;
        match result {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

/// Clears deletion protection and deletes KMS asymmetric encryption keys
pub struct AsymmetricKeySweeper;

#[async_trait]
impl Sweeper for AsymmetricKeySweeper {
    fn name(&self) -> &'static str {
        kms_asymmetric_encryption_key::RESOURCE_TYPE
    }

    async fn list(&self, ctx: &SweepContext<'_>) -> Result<Vec<Leaked>, ApiError> {
        let keys = ctx
            .clients
            .kms
            .list_asymmetric_keys(&ctx.folder_id()?)
            .await?;
        Ok(keys
            .into_iter()
            .map(|k| Leaked::new(k.id, k.name))
            .collect())
    }

    async fn sweep(&self, ctx: &SweepContext<'_>, object: &Leaked) -> Result<(), ApiError> {
        let kms = &ctx.clients.kms;
        let mut request = UpdateAsymmetricKeyRequest::default();
        request.update_mask.push("deletionProtection");
        request.deletion_protection = Some(false);
        ctx.finish(
            kms.update_asymmetric_key(&object.id, &request).await,
            KMS_TIMEOUT,
        )
        .await?;
        ctx.finish(kms.delete_asymmetric_key(&object.id).await, KMS_TIMEOUT)
            .await
    }
}

/// Clears deletion protection and deletes managed ClickHouse clusters
pub struct ClickHouseClusterSweeper;

#[async_trait]
impl Sweeper for ClickHouseClusterSweeper {
    fn name(&self) -> &'static str {
        mdb_clickhouse_cluster::RESOURCE_TYPE
    }

    async fn list(&self, ctx: &SweepContext<'_>) -> Result<Vec<Leaked>, ApiError> {
        let clusters = ctx
            .clients
            .clickhouse
            .list_clusters(&ctx.folder_id()?)
            .await?;
        Ok(clusters
            .into_iter()
            .map(|c| Leaked::new(c.id, c.name))
            .collect())
    }

    async fn sweep(&self, ctx: &SweepContext<'_>, object: &Leaked) -> Result<(), ApiError> {
        let clickhouse = &ctx.clients.clickhouse;
        let mut request = UpdateClickHouseClusterRequest::default();
        request.update_mask.push("deletionProtection");
        request.deletion_protection = Some(false);
        match ctx
            .finish(
                clickhouse.update_cluster(&object.id, &request).await,
                CLICKHOUSE_TIMEOUT,
            )
            .await
        {
            // already unprotected
            Err(e) if e.message.eq_ignore_ascii_case("no changes detected") => {}
            other => other?,
        }
        ctx.finish(
            clickhouse.delete_cluster(&object.id).await,
            CLICKHOUSE_TIMEOUT,
        )
        .await
    }
}

/// Moves test clouds off the first test billing account
///
/// Bindings cannot be removed, so leaked ones are rebound to the second
/// test account. Does nothing unless both accounts are configured.
pub struct CloudBindingSweeper {
    accounts: Option<(String, String)>,
}

impl CloudBindingSweeper {
    pub fn new(from: Option<String>, to: Option<String>) -> Self {
        let accounts = from.zip(to).filter(|(f, t)| !f.is_empty() && !t.is_empty());
        Self { accounts }
    }
}

#[async_trait]
impl Sweeper for CloudBindingSweeper {
    fn name(&self) -> &'static str {
        billing_cloud_binding::RESOURCE_TYPE
    }

    async fn list(&self, ctx: &SweepContext<'_>) -> Result<Vec<Leaked>, ApiError> {
        let Some((from, _)) = &self.accounts else {
            info!(
                "{}: {} and {} not set, skipping",
                self.name(),
                BILLING_ACCOUNT_FROM_ENV,
                BILLING_ACCOUNT_TO_ENV
            );
            return Ok(Vec::new());
        };
        let bindings = ctx.clients.billing.list_billable_object_bindings(from).await?;
        Ok(bindings
            .into_iter()
            .map(|b| Leaked::new(b.billable_object.id.clone(), b.billable_object.id))
            .collect())
    }

    async fn sweep(&self, ctx: &SweepContext<'_>, object: &Leaked) -> Result<(), ApiError> {
        let Some((_, to)) = &self.accounts else {
            return Ok(());
        };
        ctx.finish(
            ctx.clients
                .billing
                .bind_billable_object(to, &BillableObject::cloud(&object.id))
                .await,
            BILLING_TIMEOUT,
        )
        .await
    }
}

/// Every sweeper, in registration order
pub fn standard_sweepers(env: impl Fn(&str) -> Option<String>) -> Vec<Box<dyn Sweeper>> {
    vec![
        Box::new(BucketSweeper),
        Box::new(AsymmetricKeySweeper),
        Box::new(ClickHouseClusterSweeper),
        Box::new(CloudBindingSweeper::new(
            env(BILLING_ACCOUNT_FROM_ENV),
            env(BILLING_ACCOUNT_TO_ENV),
        )),
    ]
}

/// Registry of sweepers run in dependency order
pub struct SweepRunner {
    sweepers: Vec<Box<dyn Sweeper>>,
}

impl SweepRunner {
    pub fn new(sweepers: Vec<Box<dyn Sweeper>>) -> Self {
        Self { sweepers }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sweepers.iter().map(|s| s.name()).collect()
    }

    fn find(&self, name: &str) -> Option<&dyn Sweeper> {
        self.sweepers
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.as_ref())
    }

    /// Sweepers to run, each after its dependencies
    ///
    /// With `only`, that sweeper and what it depends on.
    pub fn order(&self, only: Option<&str>) -> Result<Vec<&dyn Sweeper>, SweepError> {
        let roots: Vec<&dyn Sweeper> = match only {
            Some(name) => vec![
                self.find(name)
                    .ok_or_else(|| SweepError::UnknownSweeper(name.to_string()))?,
            ],
            None => self.sweepers.iter().map(|s| s.as_ref()).collect(),
        };

        let mut ordered = Vec::new();
        let mut done = HashSet::new();
        let mut visiting = HashSet::new();
        for root in roots {
            self.visit(root, &mut visiting, &mut done, &mut ordered)?;
        }
        Ok(ordered)
    }

    fn visit<'a>(
        &'a self,
        sweeper: &'a dyn Sweeper,
        visiting: &mut HashSet<&'static str>,
        done: &mut HashSet<&'static str>,
        ordered: &mut Vec<&'a dyn Sweeper>,
    ) -> Result<(), SweepError> {
        let name = sweeper.name();
        if done.contains(name) {
            return Ok(());
        }
        if !visiting.insert(name) {
            return Err(SweepError::Cycle(name));
        }
        for &dependency in sweeper.dependencies() {
            let next = self
                .find(dependency)
                .ok_or(SweepError::MissingDependency {
                    sweeper: name,
                    dependency,
                })?;
            self.visit(next, visiting, done, ordered)?;
        }
        visiting.remove(name);
        done.insert(name);
        ordered.push(sweeper);
        Ok(())
    }

    /// Run the selected sweepers on objects whose name starts with `prefix`
    ///
    /// Every sweeper runs even if an earlier one failed; failures are
    /// collected into one error.
    pub async fn run(
        &self,
        ctx: &SweepContext<'_>,
        only: Option<&str>,
        prefix: Option<&str>,
    ) -> Result<SweepReport, SweepError> {
        let mut report = SweepReport::default();
        let mut failures = Vec::new();

        for sweeper in self.order(only)? {
            let name = sweeper.name();
            let leaked = match sweeper.list(ctx).await {
                Ok(leaked) => leaked,
                Err(e) => {
                    warn!("{}: listing failed: {}", name, e);
                    failures.push(SweepFailure {
                        sweeper: name,
                        object: "*".to_string(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let mut swept = 0;
            for object in leaked
                .iter()
                .filter(|o| utils::matches_prefix(&o.name, prefix))
            {
                if ctx.cancel.is_cancelled() {
                    break;
                }
                let label = format!("sweep {} '{}'", name, object.id);
                info!("started {}", label);
                match retry_attempts(&label, ctx.config.max_retries, RETRY_INTERVAL, || {
                    sweeper.sweep(ctx, object)
                })
                .await
                {
                    Ok(()) => swept += 1,
                    Err(e) => failures.push(SweepFailure {
                        sweeper: name,
                        object: object.id.clone(),
                        message: e.to_string(),
                    }),
                }
            }
            info!("{}: swept {} object(s)", name, swept);
            report.swept.insert(name, swept);
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(SweepError::Failed(failures))
        }
    }
}
