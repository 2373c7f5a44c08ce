//! Model generation persistence
//!
//! A generation directory holds everything serving needs, written together
//! and loaded together:
//!
//! - `generation.json`: manifest with window shape, label policy, classifier
//!   kind and SHA-256 checksums of the other files
//! - `scaler.json`: feature scaler statistics
//! - `model.json` / `model.onnx`: classifier
//! - `thresholds.json`: decision and safety thresholds
//!
//! Writes go to a sibling staging directory that is renamed into place only
//! once every file is on disk. The replaced generation is kept as
//! `<name>.previous`.

use crate::calibration::ThresholdConfig;
use crate::classifier::{load_classifier, ClassifierKind, SequenceClassifier, TrainableClassifier};
use crate::error::{DetectorError, Result, WindowShape};
use crate::models::LabelPolicy;
use crate::preprocess::{FeatureScaler, ScalerState};
use crate::training::TrainingSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const MANIFEST_FILE: &str = "generation.json";
pub const SCALER_FILE: &str = "scaler.json";
pub const THRESHOLDS_FILE: &str = "thresholds.json";

const STAGING_SUFFIX: &str = "staging";
const PREVIOUS_SUFFIX: &str = "previous";

/// Manifest describing one model generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationManifest {
    pub generation_id: String,
    pub created_at: DateTime<Utc>,
    pub seq_len: usize,
    pub feature_names: Vec<String>,
    pub label_policy: LabelPolicy,
    pub classifier: ClassifierKind,
    /// File name to hex SHA-256; files without an entry are not verified
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training: Option<TrainingSummary>,
}

impl GenerationManifest {
    pub fn new(
        seq_len: usize,
        feature_names: Vec<String>,
        label_policy: LabelPolicy,
        classifier: ClassifierKind,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            generation_id: created_at.format("%Y%m%dT%H%M%SZ").to_string(),
            created_at,
            seq_len,
            feature_names,
            label_policy,
            classifier,
            checksums: BTreeMap::new(),
            training: None,
        }
    }

    pub fn with_training(mut self, summary: TrainingSummary) -> Self {
        self.training = Some(summary);
        self
    }

    pub fn window_shape(&self) -> WindowShape {
        WindowShape::new(self.seq_len, self.feature_names.len())
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.seq_len == 0 || self.feature_names.is_empty() {
            return Err(DetectorError::artifact(
                "manifest",
                path,
                format!("invalid window shape {}", self.window_shape()),
            ));
        }
        Ok(())
    }
}

/// Where the served thresholds came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdsSource {
    Loaded,
    /// File missing, built-in defaults in use
    Default,
}

/// Everything serving needs, loaded all-or-nothing
pub struct LoadedArtifacts {
    pub manifest: GenerationManifest,
    pub scaler: FeatureScaler,
    pub classifier: Box<dyn SequenceClassifier>,
    pub thresholds: ThresholdConfig,
    pub thresholds_source: ThresholdsSource,
}

/// SHA-256 of `data` as lowercase hex
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn sibling(dir: &Path, suffix: &str) -> Result<PathBuf> {
    let name = dir.file_name().ok_or_else(|| {
        DetectorError::InvalidConfig(format!(
            "generation directory {} has no final component",
            dir.display()
        ))
    })?;
    let mut sibling = name.to_os_string();
    sibling.push(".");
    sibling.push(suffix);
    Ok(dir.with_file_name(sibling))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_vec_pretty(value)?)?;
    Ok(())
}

/// Write a complete generation into `dir`
///
/// Checksums are computed here; any passed in `manifest` are replaced.
pub fn write_generation<C>(
    dir: &Path,
    mut manifest: GenerationManifest,
    scaler: &ScalerState,
    classifier: &C,
    thresholds: &ThresholdConfig,
) -> Result<GenerationManifest>
where
    C: TrainableClassifier + ?Sized,
{
    let staging = sibling(dir, STAGING_SUFFIX)?;
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    if let Some(parent) = staging.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::create_dir(&staging)?;

    let result = stage_files(&staging, &mut manifest, scaler, classifier, thresholds)
        .and_then(|()| swap_into_place(&staging, dir));
    if result.is_err() {
        if let Err(e) = fs::remove_dir_all(&staging) {
            warn!(path = %staging.display(), error = %e, "Failed to clean up staging directory");
        }
    }
    result?;

    info!(
        generation = %manifest.generation_id,
        path = %dir.display(),
        classifier = %manifest.classifier,
        "Model generation written"
    );
    Ok(manifest)
}

fn stage_files<C>(
    staging: &Path,
    manifest: &mut GenerationManifest,
    scaler: &ScalerState,
    classifier: &C,
    thresholds: &ThresholdConfig,
) -> Result<()>
where
    C: TrainableClassifier + ?Sized,
{
    manifest.classifier = classifier.kind();
    let model_file = manifest.classifier.file_name();

    write_json(&staging.join(SCALER_FILE), scaler)?;
    classifier.save(&staging.join(model_file))?;
    write_json(&staging.join(THRESHOLDS_FILE), thresholds)?;

    manifest.checksums.clear();
    for file in [SCALER_FILE, model_file, THRESHOLDS_FILE] {
        let bytes = fs::read(staging.join(file))?;
        manifest
            .checksums
            .insert(file.to_string(), compute_checksum(&bytes));
    }
    write_json(&staging.join(MANIFEST_FILE), manifest)
}

fn swap_into_place(staging: &Path, dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::rename(staging, dir)?;
        return Ok(());
    }

    let previous = sibling(dir, PREVIOUS_SUFFIX)?;
    if previous.exists() {
        fs::remove_dir_all(&previous)?;
    }
    fs::rename(dir, &previous)?;
    if let Err(e) = fs::rename(staging, dir) {
        // Put the live generation back so `dir` is never left empty
        if let Err(restore) = fs::rename(&previous, dir) {
            warn!(
                path = %dir.display(),
                error = %restore,
                "Failed to restore replaced generation"
            );
        }
        return Err(e.into());
    }
    debug!(path = %previous.display(), "Kept replaced generation");
    Ok(())
}

/// Read and validate `generation.json`
pub fn read_manifest(dir: &Path) -> Result<GenerationManifest> {
    let path = dir.join(MANIFEST_FILE);
    let bytes = fs::read(&path).map_err(|e| DetectorError::artifact("manifest", &path, e))?;
    let manifest: GenerationManifest =
        serde_json::from_slice(&bytes).map_err(|e| DetectorError::artifact("manifest", &path, e))?;
    manifest.validate(&path)?;
    Ok(manifest)
}

/// Read a file and check it against the manifest checksum, if recorded
fn read_verified(
    dir: &Path,
    file: &str,
    artifact: &'static str,
    manifest: &GenerationManifest,
) -> Result<Vec<u8>> {
    let path = dir.join(file);
    let bytes = fs::read(&path).map_err(|e| DetectorError::artifact(artifact, &path, e))?;
    if let Some(expected) = manifest.checksums.get(file) {
        let actual = compute_checksum(&bytes);
        if &actual != expected {
            return Err(DetectorError::artifact(
                artifact,
                &path,
                format!("checksum mismatch: expected {}, got {}", expected, actual),
            ));
        }
    }
    Ok(bytes)
}

/// Read `scaler.json` and check it against the manifest feature schema
pub fn read_scaler(dir: &Path, manifest: &GenerationManifest) -> Result<FeatureScaler> {
    let path = dir.join(SCALER_FILE);
    let bytes = read_verified(dir, SCALER_FILE, "scaler", manifest)?;
    let state: ScalerState =
        serde_json::from_slice(&bytes).map_err(|e| DetectorError::artifact("scaler", &path, e))?;
    let scaler =
        FeatureScaler::from_state(state).map_err(|e| DetectorError::artifact("scaler", &path, e))?;
    if scaler.feature_names() != manifest.feature_names {
        return Err(DetectorError::artifact(
            "scaler",
            &path,
            format!(
                "scaler features {:?} do not match generation features {:?}",
                scaler.feature_names(),
                manifest.feature_names
            ),
        ));
    }
    Ok(scaler)
}

/// Read `thresholds.json`; `Ok(None)` when the file does not exist
pub fn read_thresholds(
    dir: &Path,
    manifest: &GenerationManifest,
) -> Result<Option<ThresholdConfig>> {
    let path = dir.join(THRESHOLDS_FILE);
    match fs::metadata(&path) {
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(DetectorError::artifact("thresholds", &path, e)),
        Ok(_) => {}
    }
    let bytes = read_verified(dir, THRESHOLDS_FILE, "thresholds", manifest)?;
    let thresholds: ThresholdConfig = serde_json::from_slice(&bytes)
        .map_err(|e| DetectorError::artifact("thresholds", &path, e))?;
    thresholds
        .validate()
        .map_err(|e| DetectorError::artifact("thresholds", &path, e))?;
    Ok(Some(thresholds))
}

/// Load a generation for serving
///
/// Missing thresholds fall back to defaults with a warning; every other
/// missing, corrupt or inconsistent artifact is an error. When
/// `expected_policy` is given it must match the policy the generation was
/// trained with.
pub fn load_generation(dir: &Path, expected_policy: Option<LabelPolicy>) -> Result<LoadedArtifacts> {
    let manifest = read_manifest(dir)?;
    if let Some(expected) = expected_policy {
        if expected != manifest.label_policy {
            return Err(DetectorError::artifact(
                "manifest",
                dir.join(MANIFEST_FILE),
                format!(
                    "generation trained with label policy '{}', deployment expects '{}'",
                    manifest.label_policy, expected
                ),
            ));
        }
    }

    let scaler = read_scaler(dir, &manifest)?;

    let model_file = manifest.classifier.file_name();
    let model_bytes = read_verified(dir, model_file, "model", &manifest)?;
    let classifier = load_classifier(
        manifest.classifier,
        model_bytes,
        &dir.join(model_file),
        manifest.window_shape(),
    )?;

    let (thresholds, thresholds_source) = match read_thresholds(dir, &manifest)? {
        Some(t) => (t, ThresholdsSource::Loaded),
        None => {
            warn!(
                path = %dir.join(THRESHOLDS_FILE).display(),
                "Thresholds file missing, using defaults"
            );
            (ThresholdConfig::default(), ThresholdsSource::Default)
        }
    };

    info!(
        generation = %manifest.generation_id,
        seq_len = manifest.seq_len,
        features = ?manifest.feature_names,
        policy = %manifest.label_policy,
        classifier = %manifest.classifier,
        "Model generation loaded"
    );
    Ok(LoadedArtifacts {
        manifest,
        scaler,
        classifier,
        thresholds,
        thresholds_source,
    })
}
