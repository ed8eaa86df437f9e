//! USS availability arbitration.

use dss_models::{AvailabilityStatus, DssError, UssAvailability};
use dss_store::{boxed, Repository, Store};
use tracing::info;

use crate::Service;

impl<S: Store> Service<S> {
    /// Readable by any utm peer; a USS nobody has arbitrated yet reads as
    /// `Unknown` with an empty version.
    pub async fn get_availability(&self, uss_id: String) -> Result<UssAvailability, DssError> {
        self.store()
            .interact(move |repo: &mut dyn Repository| {
                boxed(async move {
                    Ok(repo
                        .get_availability(&uss_id)
                        .await?
                        .unwrap_or_else(|| UssAvailability::unknown(&uss_id)))
                })
            })
            .await
    }

    /// Writable by the arbitration role only (the daemon enforces the
    /// scope). `old_version` is the version string previously read; an
    /// empty string matches a record nobody has written yet.
    pub async fn set_availability(
        &self,
        uss_id: String,
        status: AvailabilityStatus,
        old_version: String,
    ) -> Result<UssAvailability, DssError> {
        let updated = self
            .store()
            .transact(move |repo: &mut dyn Repository| {
                let uss_id = uss_id.clone();
                let old_version = old_version.clone();
                boxed(async move {
                    let current = repo.get_availability(&uss_id).await?;
                    let current_version = current
                        .and_then(|a| a.version)
                        .map(|v| v.to_string())
                        .unwrap_or_default();
                    if current_version != old_version {
                        return Err(DssError::VersionMismatch(format!(
                            "{old_version} is not the current availability version"
                        )));
                    }

                    repo.upsert_availability(UssAvailability {
                        uss_id,
                        status,
                        version: None,
                    })
                    .await
                })
            })
            .await?;

        info!(uss_id = %updated.uss_id, status = updated.status.as_str(), "availability set");
        Ok(updated)
    }
}
