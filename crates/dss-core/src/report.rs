//! Error reports: archival only. Each POST gets a fresh ID; nothing reads
//! them back through this service.

use dss_models::{DssError, Report};
use dss_store::{boxed, Repository, Store};
use serde_json::Value;
use tracing::info;

use crate::Service;

impl<S: Store> Service<S> {
    pub async fn make_report(&self, payload: Value) -> Result<Report, DssError> {
        if !payload.is_object() {
            return Err(DssError::BadRequest(
                "report payload must be a JSON object".to_string(),
            ));
        }

        let report = self
            .store()
            .transact(move |repo: &mut dyn Repository| {
                let payload = payload.clone();
                boxed(async move { repo.insert_report(payload).await })
            })
            .await?;

        info!(report_id = %report.id, "report filed");
        Ok(report)
    }
}
