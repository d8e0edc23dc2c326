use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::interpret::InterpretedResponse;

pub const MAX_IMAGES: usize = 5;
pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ChooseOperation,
    ProvideInput,
    ConfirmStyle,
}

impl Step {
    pub fn number(&self) -> u8 {
        match self {
            Step::ChooseOperation => 1,
            Step::ProvideInput => 2,
            Step::ConfirmStyle => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Style,
    Creative,
    Generate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePolicy {
    Required,
    Optional,
    NotAccepted,
}

impl Operation {
    pub fn key(&self) -> &'static str {
        match self {
            Operation::Style => "style",
            Operation::Creative => "creative",
            Operation::Generate => "generate",
        }
    }

    /// Display name used when tagging results, mirroring the vendor-facing
    /// operation labels.
    pub fn display_name(&self) -> &'static str {
        match self {
            Operation::Style => "风格转换",
            Operation::Creative => "创意生成",
            Operation::Generate => "一句话生成美图",
        }
    }

    pub fn image_policy(&self) -> ImagePolicy {
        match self {
            Operation::Style => ImagePolicy::Required,
            Operation::Creative => ImagePolicy::Optional,
            Operation::Generate => ImagePolicy::NotAccepted,
        }
    }

    pub fn from_key(key: &str) -> Option<Operation> {
        match key.trim().to_ascii_lowercase().as_str() {
            "style" => Some(Operation::Style),
            "creative" => Some(Operation::Creative),
            "generate" => Some(Operation::Generate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadedImage {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub mime: String,
    pub fingerprint: Option<String>,
}

impl UploadedImage {
    /// Builds the metadata record for a file on disk. The MIME type is
    /// inferred from the extension; the fingerprint is a sha256 over the
    /// file bytes and is best-effort (a read failure leaves it unset rather
    /// than failing the upload, since (name, size) is the dedupe key).
    pub fn from_path(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let metadata = fs::metadata(&path)
            .map_err(|err| anyhow::anyhow!("cannot read {}: {err}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("image")
            .to_string();
        let mime = mime_for_name(&name).unwrap_or("application/octet-stream");
        let fingerprint = fs::read(&path).ok().map(|bytes| {
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            hex::encode(hasher.finalize())
        });
        Ok(Self {
            path,
            name,
            size: metadata.len(),
            mime: mime.to_string(),
            fingerprint,
        })
    }

    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

pub fn mime_for_name(name: &str) -> Option<&'static str> {
    let lowered = name.to_ascii_lowercase();
    let ext = Path::new(&lowered).extension()?.to_str()?;
    match ext {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    NotAnImage(String),
    TooLarge(String),
    Duplicate(String),
    LimitReached,
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::NotAnImage(name) => write!(f, "{name} is not an image file"),
            UploadError::TooLarge(name) => {
                write!(f, "{name} exceeds the 10MB upload limit")
            }
            UploadError::Duplicate(name) => write!(f, "{name} was already uploaded"),
            UploadError::LimitReached => {
                write!(f, "at most {MAX_IMAGES} images can be uploaded")
            }
        }
    }
}

impl std::error::Error for UploadError {}

/// The single owned session record. Wizard transitions and input events
/// mutate it; nothing else holds a competing copy.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub step: Option<Step>,
    pub operation: Option<Operation>,
    pub images: Vec<UploadedImage>,
    pub selected_index: usize,
    pub instruction: String,
    pub selected_style: Option<String>,
    pub custom_instruction: String,
    pub seeded_instruction: Option<String>,
    pub last_response: Option<InterpretedResponse>,
    pub task_id: Option<String>,
    pub gen_id: Option<String>,
    pub result_open: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            step: Some(Step::ChooseOperation),
            ..Self::default()
        }
    }

    pub fn step(&self) -> Step {
        self.step.unwrap_or(Step::ChooseOperation)
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Validates and records an upload. Rejections mirror the original
    /// upload rules: image MIME only, 10MB cap, (name, size) dedupe, five
    /// images at most.
    pub fn add_image(&mut self, image: UploadedImage) -> Result<(), UploadError> {
        if self.images.len() >= MAX_IMAGES {
            return Err(UploadError::LimitReached);
        }
        if !image.is_image() {
            return Err(UploadError::NotAnImage(image.name));
        }
        if image.size > MAX_IMAGE_BYTES {
            return Err(UploadError::TooLarge(image.name));
        }
        if self
            .images
            .iter()
            .any(|existing| existing.name == image.name && existing.size == image.size)
        {
            return Err(UploadError::Duplicate(image.name));
        }
        self.images.push(image);
        Ok(())
    }

    pub fn remove_image(&mut self, name: &str) -> bool {
        let before = self.images.len();
        self.images.retain(|image| image.name != name);
        if self.selected_index >= self.images.len() {
            self.selected_index = 0;
        }
        self.images.len() != before
    }

    pub fn select_image(&mut self, name: &str) -> bool {
        if let Some(idx) = self.images.iter().position(|image| image.name == name) {
            self.selected_index = idx;
            return true;
        }
        false
    }

    /// The image that rides along with the next request: the explicitly
    /// selected one, defaulting to the first upload.
    pub fn selected_image(&self) -> Option<&UploadedImage> {
        self.images
            .get(self.selected_index)
            .or_else(|| self.images.first())
    }

    pub fn remember_ids(&mut self, task_id: Option<&str>, gen_id: Option<&str>) {
        if let Some(task) = task_id.map(str::trim).filter(|value| !value.is_empty()) {
            self.task_id = Some(task.to_string());
        }
        if let Some(gen) = gen_id.map(str::trim).filter(|value| !value.is_empty()) {
            self.gen_id = Some(gen.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn image(name: &str, size: u64) -> UploadedImage {
        UploadedImage {
            path: PathBuf::from(name),
            name: name.to_string(),
            size,
            mime: mime_for_name(name).unwrap_or("text/plain").to_string(),
            fingerprint: None,
        }
    }

    #[test]
    fn add_image_enforces_limit() {
        let mut state = SessionState::new();
        for idx in 0..MAX_IMAGES {
            state
                .add_image(image(&format!("photo-{idx}.png"), 100))
                .unwrap();
        }
        assert_eq!(
            state.add_image(image("one-more.png", 100)),
            Err(UploadError::LimitReached)
        );
    }

    #[test]
    fn add_image_rejects_duplicates_by_name_and_size() {
        let mut state = SessionState::new();
        state.add_image(image("photo.png", 42)).unwrap();
        assert_eq!(
            state.add_image(image("photo.png", 42)),
            Err(UploadError::Duplicate("photo.png".to_string()))
        );
        // Same name, different size is a distinct upload.
        assert!(state.add_image(image("photo.png", 43)).is_ok());
    }

    #[test]
    fn add_image_rejects_non_image_and_oversize() {
        let mut state = SessionState::new();
        assert_eq!(
            state.add_image(image("notes.txt", 10)),
            Err(UploadError::NotAnImage("notes.txt".to_string()))
        );
        assert_eq!(
            state.add_image(image("huge.png", MAX_IMAGE_BYTES + 1)),
            Err(UploadError::TooLarge("huge.png".to_string()))
        );
    }

    #[test]
    fn selected_image_defaults_to_first_upload() {
        let mut state = SessionState::new();
        state.add_image(image("a.png", 1)).unwrap();
        state.add_image(image("b.png", 2)).unwrap();
        assert_eq!(state.selected_image().map(|i| i.name.as_str()), Some("a.png"));
        assert!(state.select_image("b.png"));
        assert_eq!(state.selected_image().map(|i| i.name.as_str()), Some("b.png"));
        state.remove_image("b.png");
        assert_eq!(state.selected_image().map(|i| i.name.as_str()), Some("a.png"));
    }

    #[test]
    fn reset_returns_every_field_to_initial() {
        let mut state = SessionState::new();
        state.operation = Some(Operation::Style);
        state.instruction = "oil painting".to_string();
        state.add_image(image("a.png", 1)).unwrap();
        state.remember_ids(Some("task_abc"), Some("gen_def"));
        state.reset();
        assert_eq!(state.step(), Step::ChooseOperation);
        assert!(state.operation.is_none());
        assert!(state.images.is_empty());
        assert!(state.instruction.is_empty());
        assert!(state.task_id.is_none());
        assert!(state.gen_id.is_none());
    }

    #[test]
    fn remember_ids_ignores_empty_values() {
        let mut state = SessionState::new();
        state.remember_ids(Some("task_abc"), None);
        state.remember_ids(Some("  "), Some("gen_def"));
        assert_eq!(state.task_id.as_deref(), Some("task_abc"));
        assert_eq!(state.gen_id.as_deref(), Some("gen_def"));
    }

    #[test]
    fn from_path_records_metadata_and_fingerprint() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("sample.png");
        fs::write(&path, b"not really a png")?;
        let image = UploadedImage::from_path(&path)?;
        assert_eq!(image.name, "sample.png");
        assert_eq!(image.size, 16);
        assert_eq!(image.mime, "image/png");
        assert!(image.fingerprint.is_some());
        Ok(())
    }
}
