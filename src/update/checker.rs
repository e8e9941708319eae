//! Update checks against a release endpoint.

use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{VersionChecker, CURRENT_VERSION};
use crate::config::UpdateConfig;
use crate::models::update::VersionUpdate;
use crate::stream::StreamWriter;
use crate::{AppError, Result};

/// Polls the configured release endpoint and caches the latest update.
pub struct HttpUpdateChecker {
    config: UpdateConfig,
    client: reqwest::Client,
    latest: RwLock<Option<VersionUpdate>>,
}

impl HttpUpdateChecker {
    /// Checker for the given settings.
    #[must_use]
    pub fn new(config: UpdateConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            latest: RwLock::new(None),
        }
    }

    /// Fetch the latest release now and update the cached result.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Update` if the endpoint cannot be reached or
    /// answers with something other than a release.
    pub async fn check_now(&self) -> Result<Option<VersionUpdate>> {
        let Some(url) = self.config.check_url.as_deref() else {
            return Ok(None);
        };

        let url = reqwest::Url::parse_with_params(url, &[("version", CURRENT_VERSION)])
            .map_err(|err| AppError::Update(format!("invalid update check url: {err}")))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| AppError::Update(format!("update check failed: {err}")))?
            .error_for_status()
            .map_err(|err| AppError::Update(format!("update check failed: {err}")))?;

        let release: VersionUpdate = response
            .json()
            .await
            .map_err(|err| AppError::Update(format!("invalid update response: {err}")))?;

        let update = (release.version != CURRENT_VERSION).then_some(release);
        self.set_latest(update.clone());
        Ok(update)
    }

    /// Replace the cached update.
    pub fn set_latest(&self, update: Option<VersionUpdate>) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = update;
    }

    /// Spawn the periodic check task.
    #[must_use]
    pub fn spawn_poller(self: Arc<Self>, ct: CancellationToken) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.check_interval_seconds.max(1));
        tokio::spawn(
            async move {
                if self.config.check_url.is_none() {
                    debug!("no update check url configured");
                    return;
                }
                loop {
                    match self.check_now().await {
                        Ok(Some(update)) => info!(
                            version = %update.version,
                            forced = update.force_upgrade,
                            "update available"
                        ),
                        Ok(None) => debug!("daemon is up to date"),
                        Err(err) => warn!(%err, "update check failed"),
                    }
                    tokio::select! {
                        () = ct.cancelled() => {
                            info!("update checker shutting down");
                            break;
                        }
                        () = tokio::time::sleep(interval) => {}
                    }
                }
            }
            .instrument(info_span!("update_checker")),
        )
    }

    async fn run_upgrade(&self, update: &VersionUpdate, mut out: StreamWriter) -> Result<()> {
        let Some((program, args)) = self.config.upgrade_command.split_first() else {
            return Err(AppError::Update("no upgrade command configured".into()));
        };

        let output = tokio::process::Command::new(program)
            .args(args)
            .env("LOCALRUN_TARGET_VERSION", &update.version)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| AppError::Update(format!("failed to run {program}: {err}")))?;

        let _ = out.write_all(&output.stdout);
        let _ = out.write_all(&output.stderr);

        if output.status.success() {
            info!(version = %update.version, "upgrade installed");
            Ok(())
        } else {
            Err(AppError::Update(format!(
                "{program} exited with {}",
                output.status
            )))
        }
    }
}

impl VersionChecker for HttpUpdateChecker {
    fn available_update(&self) -> Option<VersionUpdate> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn do_upgrade<'a>(
        &'a self,
        update: &'a VersionUpdate,
        out: StreamWriter,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.run_upgrade(update, out))
    }
}
