use std::fmt::Display;

use crate::error::{ConvertError, Result};

pub const COPY_CONTAINER_WARNING: &str = "copy preset forces original container";
pub const SCALE_IGNORED_WARNING: &str = "preset already filters video; per-file resolution override ignored";

const VIDEO_FILTER_FLAGS: [&str; 3] = ["-vf", "-filter:v", "-filter_complex"];

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ResolutionOverride {
    Same,
    Scale { width: u32, height: u32 },
}

impl ResolutionOverride {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("same") {
            return Ok(ResolutionOverride::Same);
        }
        let parts: Vec<&str> = s.split(|c| c == 'x' || c == 'X').collect();
        if parts.len() != 2 {
            return Err(ConvertError::invalid_override(s, "expected \"Same\" or WxH"));
        }
        match (parts[0].parse::<u32>(), parts[1].parse::<u32>()) {
            (Ok(width), Ok(height)) if width > 0 && height > 0 => Ok(ResolutionOverride::Scale { width, height }),
            _ => Err(ConvertError::invalid_override(s, "width and height must be positive integers")),
        }
    }
}

impl Default for ResolutionOverride {
    fn default() -> Self {
        ResolutionOverride::Same
    }
}

impl Display for ResolutionOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionOverride::Same => write!(f, "Same"),
            ResolutionOverride::Scale { width, height } => write!(f, "{}x{}", width, height),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FormatOverride {
    Same,
    Extension(String),
}

impl FormatOverride {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("same") {
            return Ok(FormatOverride::Same);
        }
        let ext = normalize_extension(s);
        if ext.is_empty() || ext.contains(|c: char| c == '/' || c == '\\' || c.is_whitespace()) {
            return Err(ConvertError::invalid_override(s, "expected \"Same\" or a file extension"));
        }
        Ok(FormatOverride::Extension(ext))
    }
}

impl Default for FormatOverride {
    fn default() -> Self {
        FormatOverride::Same
    }
}

/// Per-file output settings chosen by the host.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutputOverride {
    /// `None` means the input stem plus the batch's suffix policy.
    pub base_name: Option<String>,
    pub resolution: ResolutionOverride,
    pub format: FormatOverride,
}

impl OutputOverride {
    pub fn base_name(mut self, base_name: &str) -> Self {
        self.base_name = Some(String::from(base_name));
        self
    }

    pub fn resolution(mut self, resolution: ResolutionOverride) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn format(mut self, format: FormatOverride) -> Self {
        self.format = format;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedArgs {
    pub args: Vec<String>,
    pub output_extension: String,
    pub warnings: Vec<String>,
}

impl ResolvedArgs {
    pub fn args_line(&self) -> String {
        self.args.join(" ")
    }
}

/// Output container for a job, plus the copy-conflict warning when it applies.
pub fn output_extension(template_args: &[String], input_extension: &str, output: &OutputOverride) -> (String, Option<String>) {
    let input_extension = normalize_extension(input_extension);
    let requested = match &output.format {
        FormatOverride::Same => input_extension.clone(),
        FormatOverride::Extension(ext) => ext.clone(),
    };

    if is_stream_copy(template_args) && requested != input_extension {
        (input_extension, Some(String::from(COPY_CONTAINER_WARNING)))
    } else {
        (requested, None)
    }
}

pub fn resolve(template: &str, input_extension: &str, output: &OutputOverride) -> ResolvedArgs {
    let template_args = split_args(template);
    let (output_extension, copy_warning) = output_extension(&template_args, input_extension, output);
    let mut warnings: Vec<String> = copy_warning.into_iter().collect();

    let args = match output.resolution {
        ResolutionOverride::Same => template_args,
        ResolutionOverride::Scale { width, height } => {
            if has_video_filter(&template_args) {
                warnings.push(String::from(SCALE_IGNORED_WARNING));
                template_args
            } else {
                let mut args = vec![String::from("-vf"), format!("scale={}:{}", width, height)];
                args.extend(template_args);
                args
            }
        },
    };

    ResolvedArgs {
        args,
        output_extension,
        warnings,
    }
}

fn is_stream_copy(args: &[String]) -> bool {
    args.windows(2).any(|pair| pair[0] == "-c" && pair[1] == "copy")
}

fn has_video_filter(args: &[String]) -> bool {
    args.iter().any(|arg| VIDEO_FILTER_FLAGS.contains(&arg.as_str()))
}

pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// Splits an argument template on whitespace. Single and double quotes
/// group words and are removed.
pub fn split_args(template: &str) -> Vec<String> {
    let mut args = vec![];
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in template.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => match c {
                '"' | '\'' => {
                    quote = Some(c);
                    in_word = true;
                },
                c if c.is_whitespace() => {
                    if in_word {
                        args.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                },
                c => {
                    current.push(c);
                    in_word = true;
                },
            },
        }
    }

    if in_word {
        args.push(current);
    }
    args
}
