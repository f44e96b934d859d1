//! Model-id resolution: request → runtime default → configured default.

use std::sync::{PoisonError, RwLock};

use tracing::info;

/// Picks the model id for a run.
///
/// The runtime default can be changed while the process runs (e.g. through
/// `PUT /api/model/default`) and applies to runs started afterwards.
#[derive(Debug)]
pub struct ModelResolver {
    configured: String,
    runtime_default: RwLock<Option<String>>,
}

impl ModelResolver {
    pub fn new(configured: impl Into<String>) -> Self {
        Self {
            configured: configured.into(),
            runtime_default: RwLock::new(None),
        }
    }

    /// The model id a run should use.
    pub fn resolve(&self, requested: Option<&str>) -> String {
        match requested.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => self.default_model(),
        }
    }

    /// The current default: runtime override if set, else the configured one.
    pub fn default_model(&self) -> String {
        self.runtime_default
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| self.configured.clone())
    }

    pub fn set_default(&self, model_id: impl Into<String>) {
        let model_id = model_id.into();
        info!(model_id = %model_id, "Default model updated");
        *self.runtime_default.write().unwrap_or_else(PoisonError::into_inner) = Some(model_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_order() {
        let resolver = ModelResolver::new("configured");
        assert_eq!(resolver.resolve(None), "configured");
        assert_eq!(resolver.resolve(Some("  ")), "configured");
        assert_eq!(resolver.resolve(Some("forwarded")), "forwarded");

        resolver.set_default("runtime");
        assert_eq!(resolver.resolve(None), "runtime");
        assert_eq!(resolver.resolve(Some("forwarded")), "forwarded");
        assert_eq!(resolver.default_model(), "runtime");
    }
}
