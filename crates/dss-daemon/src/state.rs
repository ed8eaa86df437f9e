//! Shared runtime state for the daemon.
//!
//! Handlers receive `State<Arc<AppState<S>>>` from Axum. The store type is
//! generic so the scenario tests run the full router against the
//! in-memory store double.

use std::sync::Arc;

use dss_auth::Authorizer;
use dss_core::Service;
use dss_models::DssError;
use dss_store::Store;

use crate::error_map::ApiError;

pub struct AppState<S: Store> {
    pub service: Service<S>,
    pub auth: Arc<Authorizer>,
    /// Replace internal error messages with a constant string on the wire.
    pub obfuscate_internal_errors: bool,
    pub enable_scd: bool,
}

impl<S: Store> AppState<S> {
    pub fn new(service: Service<S>, auth: Arc<Authorizer>) -> AppState<S> {
        AppState {
            service,
            auth,
            obfuscate_internal_errors: true,
            enable_scd: true,
        }
    }

    pub fn with_obfuscation(mut self, obfuscate: bool) -> AppState<S> {
        self.obfuscate_internal_errors = obfuscate;
        self
    }

    pub fn with_scd(mut self, enable: bool) -> AppState<S> {
        self.enable_scd = enable;
        self
    }

    /// Wrap a service error for the wire, honoring the obfuscation toggle.
    pub fn api_err(&self, err: DssError) -> ApiError {
        ApiError::new(err, self.obfuscate_internal_errors)
    }
}
