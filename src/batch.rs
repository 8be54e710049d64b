use std::collections::HashMap;
use std::path::{self, Component, Path, PathBuf};

use crate::error::{ConvertError, Result};
use crate::job::ConversionJob;
use crate::presets::{Preset, PresetSet};
use crate::resolver::{output_extension, split_args, OutputOverride};

/// One input file and the host's overrides for it.
#[derive(Clone, Debug)]
pub struct JobRequest {
    pub input: PathBuf,
    pub output_override: OutputOverride,
}

impl JobRequest {
    pub fn new(input: PathBuf) -> Self {
        JobRequest {
            input,
            output_override: OutputOverride::default(),
        }
    }

    pub fn with_override(mut self, output_override: OutputOverride) -> Self {
        self.output_override = output_override;
        self
    }
}

/// Where outputs go and how default names are derived.
#[derive(Clone, Debug, Default)]
pub struct OutputPolicy {
    /// `None` writes next to each input.
    pub output_dir: Option<PathBuf>,
    /// Appended to the input stem when a job has no explicit base name.
    pub suffix: Option<String>,
}

impl OutputPolicy {
    pub fn output_dir(mut self, output_dir: PathBuf) -> Self {
        self.output_dir = Some(output_dir);
        self
    }

    pub fn suffix(mut self, suffix: &str) -> Self {
        self.suffix = Some(String::from(suffix));
        self
    }
}

/// Immutable snapshot of a batch: the preset and the planned jobs.
///
/// Changes the host makes after planning never reach a running batch.
#[derive(Clone, Debug)]
pub struct Batch {
    pub preset: Preset,
    pub jobs: Vec<ConversionJob>,
}

impl Batch {
    pub fn plan(requests: &[JobRequest], preset_name: &str, presets: &PresetSet, policy: &OutputPolicy) -> Result<Batch> {
        let preset = presets.get(preset_name)?.clone();
        let template_args = split_args(&preset.template);
        let mut owners: HashMap<PathBuf, PathBuf> = HashMap::new();
        let inputs: HashMap<PathBuf, &PathBuf> = requests
            .iter()
            .map(|r| (normalize_path(&r.input), &r.input))
            .collect();
        let mut jobs = Vec::with_capacity(requests.len());

        for (index, request) in requests.iter().enumerate() {
            let input_extension = request
                .input
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default();
            let (extension, _) = output_extension(&template_args, &input_extension, &request.output_override);
            let output = output_path(&request.input, &request.output_override, &extension, policy);

            let key = normalize_path(&output);
            if key == normalize_path(&request.input) {
                return Err(ConvertError::OutputOverwritesInput(request.input.clone()));
            }
            if let Some(other) = inputs.get(&key) {
                return Err(ConvertError::OutputCollision {
                    first: request.input.clone(),
                    second: (*other).clone(),
                    output,
                });
            }
            if let Some(first) = owners.insert(key, request.input.clone()) {
                return Err(ConvertError::OutputCollision {
                    first,
                    second: request.input.clone(),
                    output,
                });
            }

            jobs.push(ConversionJob::new(index, request.input.clone(), output, request.output_override.clone()));
        }

        Ok(Batch { preset, jobs })
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// `<outputDir>/<baseName>.<extension>`
pub fn output_path(input: &PathBuf, output_override: &OutputOverride, extension: &str, policy: &OutputPolicy) -> PathBuf {
    let base_name = match &output_override.base_name {
        Some(name) => name.clone(),
        None => {
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            format!("{}{}", stem, policy.suffix.as_deref().unwrap_or(""))
        },
    };

    let dir = match &policy.output_dir {
        Some(dir) => dir.clone(),
        None => input.parent().map(PathBuf::from).unwrap_or_default(),
    };

    let file_name = match extension {
        "" => base_name,
        ext => format!("{}.{}", base_name, ext),
    };
    dir.join(file_name)
}

/// Absolute, lexically normalised form of `path`, for comparing paths that
/// may not exist yet. Symlinks are not resolved.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = path::absolute(path).unwrap_or_else(|_| PathBuf::from(path));
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => (),
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            },
            other => normalized.push(other),
        }
    }
    normalized
}
