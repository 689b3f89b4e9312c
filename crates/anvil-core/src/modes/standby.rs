//! ---
//! anvil_section: "01-core-functionality"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Standby mode: image staging and preparation."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use anvil_api::CommandError;
use anvil_manifest::Manifest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use url::Url;

use crate::commands::CommandOutcome;
use crate::modes::{Execution, ModeImplementation};

/// Image description submitted by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    pub urls: Vec<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    /// Package constraint manifest shipped with the image, validated before
    /// the image is accepted.
    #[serde(default)]
    pub package_manifest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageParams {
    image: ImageInfo,
}

/// Machine-is-waiting mode: fetches and prepares deployment images.
pub struct StandbyMode {
    cache_dir: PathBuf,
}

impl StandbyMode {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn parse_params(params: Value) -> Result<ImageInfo, CommandError> {
        let parsed: ImageParams = serde_json::from_value(params)
            .map_err(|err| CommandError::InvalidParameters(err.to_string()))?;
        validate_image(&parsed.image)?;
        Ok(parsed.image)
    }

    fn staged_path(&self, image_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{image_id}.json"))
    }

    fn is_staged(&self, image_id: &str) -> bool {
        self.staged_path(image_id).is_file()
    }

    fn cache_image(&self, image: ImageInfo) -> Execution {
        let staged = self.staged_path(&image.id);
        let cache_dir = self.cache_dir.clone();
        Execution::Async(tokio::spawn(async move {
            stage_image(&cache_dir, &staged, &image).await
        }))
    }

    fn prepare_image(&self, image: ImageInfo) -> Execution {
        if !self.is_staged(&image.id) {
            return Execution::Sync(CommandOutcome::Failure(format!(
                "image '{}' has not been cached",
                image.id
            )));
        }
        let package_count = image
            .package_manifest
            .as_deref()
            // validate_image() already proved the manifest parses
            .and_then(|text| Manifest::parse(text).ok())
            .map(|manifest| manifest.len());
        info!(image_id = %image.id, ?package_count, "image prepared");
        Execution::Sync(CommandOutcome::Success(json!({
            "image_id": image.id,
            "prepared": true,
            "package_count": package_count,
        })))
    }

    fn run_image(&self, image: ImageInfo) -> Execution {
        if !self.is_staged(&image.id) {
            return Execution::Sync(CommandOutcome::Failure(format!(
                "image '{}' has not been cached",
                image.id
            )));
        }
        // The real reboot is issued by the control plane once it sees this
        // result; the agent only reports readiness.
        info!(image_id = %image.id, "image ready to boot");
        Execution::Sync(CommandOutcome::Success(json!({
            "image_id": image.id,
            "ready_to_boot": true,
        })))
    }
}

#[async_trait]
impl ModeImplementation for StandbyMode {
    fn name(&self) -> &'static str {
        "standby"
    }

    async fn execute(&self, command: &str, params: Value) -> Result<Execution, CommandError> {
        match command {
            "cache_image" => Ok(self.cache_image(Self::parse_params(params)?)),
            "prepare_image" => Ok(self.prepare_image(Self::parse_params(params)?)),
            "run_image" => Ok(self.run_image(Self::parse_params(params)?)),
            other => Err(CommandError::InvalidCommand(format!(
                "unknown standby command '{other}'"
            ))),
        }
    }
}

fn validate_image(image: &ImageInfo) -> Result<(), CommandError> {
    if image.id.is_empty()
        || !image
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(CommandError::InvalidParameters(format!(
            "image id '{}' is not a safe identifier",
            image.id
        )));
    }
    if image.urls.is_empty() {
        return Err(CommandError::InvalidParameters(format!(
            "image '{}' has no download urls",
            image.id
        )));
    }
    for raw in &image.urls {
        let url = Url::parse(raw)
            .map_err(|err| CommandError::InvalidParameters(format!("bad url '{raw}': {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CommandError::InvalidParameters(format!(
                "image url '{raw}' must be http or https"
            )));
        }
    }
    if let Some(manifest) = &image.package_manifest {
        Manifest::parse(manifest).map_err(|err| {
            CommandError::InvalidParameters(format!(
                "image '{}' package manifest is invalid: {err}",
                image.id
            ))
        })?;
    }
    Ok(())
}

/// Stage image metadata into the cache directory.
///
/// Fetching the actual image payload happens over the deployment network
/// out-of-band; the agent records what it was told so later commands can
/// verify the image was announced.
async fn stage_image(cache_dir: &Path, staged: &Path, image: &ImageInfo) -> CommandOutcome {
    if let Err(err) = tokio::fs::create_dir_all(cache_dir).await {
        warn!(dir = %cache_dir.display(), error = %err, "cannot create image cache");
        return CommandOutcome::Failure(format!(
            "cannot create image cache {}: {err}",
            cache_dir.display()
        ));
    }
    let contents = match serde_json::to_vec_pretty(image) {
        Ok(contents) => contents,
        Err(err) => return CommandOutcome::Failure(format!("cannot serialize image: {err}")),
    };
    if let Err(err) = tokio::fs::write(staged, contents).await {
        return CommandOutcome::Failure(format!(
            "cannot stage image {}: {err}",
            staged.display()
        ));
    }
    info!(image_id = %image.id, path = %staged.display(), "image metadata staged");
    CommandOutcome::Success(json!({
        "image_id": image.id,
        "staged_path": staged.display().to_string(),
    }))
}
