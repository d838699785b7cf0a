//! Shared state handed to every handler.

use stratus_compute::ComputeService;
use stratus_core::Config;
use stratus_iam::IamService;
use stratus_object::StorageService;

/// Everything the handlers need. Cheap to clone; services share their
/// pools internally.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Base URL used in `selfLink` fields, e.g. `http://localhost:8080`.
    pub base_url: String,
    pub storage: StorageService,
    pub iam: IamService,
    pub compute: ComputeService,
}

impl AppState {
    pub fn new(
        config: Config,
        base_url: impl Into<String>,
        storage: StorageService,
        iam: IamService,
        compute: ComputeService,
    ) -> Self {
        Self { config, base_url: base_url.into(), storage, iam, compute }
    }

    /// The project a request that names none falls back to.
    pub fn project_or_default<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        match requested {
            Some(project) if !project.is_empty() => project,
            _ => &self.config.default_project,
        }
    }
}
