use crate::engine::StageEngine;
use crate::CoreError;
use stagehand_schema::{PackageRequirement, SchemaError, StageToken, VersionNormalizer};
use stagehand_store::Metadata;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Metadata key under which target versions are stashed at create time.
pub const PACKAGE_VERSIONS_KEY: &str = "package_versions";

/// Drives a [`StageEngine`] to upgrade named packages to target versions.
///
/// Versions are normalized once, in [`PackageUpdater::begin`], and stored in
/// the stage metadata so a later process can run [`PackageUpdater::stage`]
/// without re-deriving them.
pub struct PackageUpdater {
    engine: StageEngine,
    normalizer: Arc<dyn VersionNormalizer>,
}

impl PackageUpdater {
    pub fn new(engine: StageEngine, normalizer: Arc<dyn VersionNormalizer>) -> Self {
        Self { engine, normalizer }
    }

    pub fn engine(&self) -> &StageEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut StageEngine {
        &mut self.engine
    }

    pub fn into_engine(self) -> StageEngine {
        self.engine
    }

    fn normalize_all(
        &self,
        versions: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, SchemaError> {
        versions
            .iter()
            .map(|(name, v)| Ok((name.clone(), self.normalizer.normalize(v)?)))
            .collect()
    }

    /// Create the stage with `runtime` and `dev` target versions in metadata.
    pub fn begin(
        &mut self,
        runtime: &BTreeMap<String, String>,
        dev: &BTreeMap<String, String>,
    ) -> Result<StageToken, CoreError> {
        if runtime.is_empty() && dev.is_empty() {
            return Err(CoreError::Schema(SchemaError::InvalidRequirement {
                input: String::new(),
                reason: "no packages to update".to_owned(),
            }));
        }
        let runtime = self.normalize_all(runtime)?;
        let dev = self.normalize_all(dev)?;
        // Reject names up front rather than after the copy.
        for (name, version) in runtime.iter().chain(&dev) {
            PackageRequirement::new(name, Some(version))?;
        }

        let mut metadata = Metadata::new();
        metadata.insert(
            PACKAGE_VERSIONS_KEY.to_owned(),
            serde_json::json!({ "runtime": runtime, "dev": dev }),
        );
        let token = self.engine.create(metadata)?;
        info!(
            "update stage {token} created for {} package(s)",
            runtime.len() + dev.len()
        );
        Ok(token)
    }

    /// The stored target versions as requirements.
    pub fn package_versions(
        &self,
    ) -> Result<(Vec<PackageRequirement>, Vec<PackageRequirement>), CoreError> {
        let Some(value) = self.engine.get_metadata(PACKAGE_VERSIONS_KEY)? else {
            return Ok((Vec::new(), Vec::new()));
        };
        let section = |key: &str| -> Result<Vec<PackageRequirement>, CoreError> {
            let map: BTreeMap<String, String> = match value.get(key) {
                Some(v) => serde_json::from_value(v.clone())?,
                None => BTreeMap::new(),
            };
            map.iter()
                .map(|(name, version)| Ok(PackageRequirement::new(name, Some(version))?))
                .collect()
        };
        Ok((section("runtime")?, section("dev")?))
    }

    /// Require the stored target versions inside the stage.
    pub fn stage(&mut self) -> Result<(), CoreError> {
        let (runtime, dev) = self.package_versions()?;
        self.engine.require(&runtime, &dev)
    }

    pub fn apply(&mut self) -> Result<(), CoreError> {
        self.engine.apply()
    }

    pub fn destroy(&mut self, force: bool) -> Result<(), CoreError> {
        self.engine.destroy(force)
    }
}
