pub mod progress;

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

pub const INVALID_RESPONSE_MESSAGE: &str =
    "the service returned an unexpected response format; try again later";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Text,
    TextAndImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Normalized view of one vendor reply: a display-ready body plus, when any
/// extractor located one, a resolved image URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterpretedResponse {
    pub kind: ResponseKind,
    pub body: String,
    pub image_url: Option<String>,
    pub status: ResponseStatus,
    pub task_id: Option<String>,
    pub gen_id: Option<String>,
}

impl InterpretedResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Text,
            body: message.into(),
            image_url: None,
            status: ResponseStatus::Error,
            task_id: None,
            gen_id: None,
        }
    }

    pub fn has_image(&self) -> bool {
        self.image_url.is_some()
    }

    pub fn is_error(&self) -> bool {
        self.status == ResponseStatus::Error
    }
}

/// Identifiers remembered from earlier replies. The interpreter itself is
/// pure; the session layer owns persistence of these across calls.
#[derive(Debug, Clone, Default)]
pub struct InterpretContext {
    pub prior_task_id: Option<String>,
    pub prior_gen_id: Option<String>,
}

/// Merged view handed to the extractor battery: in-text identifiers win,
/// context identifiers fill the gaps.
#[derive(Debug, Clone, Default)]
pub struct ExtractContext {
    pub task_id: Option<String>,
    pub gen_id: Option<String>,
}

type TextExtractor = fn(&str, &ExtractContext) -> Option<String>;

/// The battery, applied first-match-wins. Order is a contract: explicit
/// structured signals outrank loose heuristics, and identifier synthesis
/// outranks completion-marker recovery.
const TEXT_EXTRACTORS: &[(&str, TextExtractor)] = &[
    ("markdown-image", extract_markdown_image),
    ("bare-url", extract_bare_url),
    ("vendor-cdn", extract_vendor_cdn),
    ("fenced-json", extract_fenced_json),
    ("id-synthesis", extract_id_synthesis),
    ("download-link", extract_download_link),
    ("completion-recovery", extract_completion_recovery),
];

pub fn interpret(payload: &Value, ctx: &InterpretContext) -> InterpretedResponse {
    let message = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"));
    let Some(message) = message else {
        return InterpretedResponse::error(INVALID_RESPONSE_MESSAGE);
    };

    let content = message.get("content");
    let blocks = content.and_then(Value::as_array);
    let text = content_text(content);
    let structured_url = blocks.and_then(|rows| block_image_url(rows));
    if structured_url.is_none() && text.trim().is_empty() {
        return InterpretedResponse::error(INVALID_RESPONSE_MESSAGE);
    }

    let extract_ctx = ExtractContext {
        task_id: find_task_id(&text).or_else(|| ctx.prior_task_id.clone()),
        gen_id: find_gen_id(&text).or_else(|| ctx.prior_gen_id.clone()),
    };

    let image_url = structured_url
        .or_else(|| {
            TEXT_EXTRACTORS
                .iter()
                .find_map(|(_, extractor)| extractor(&text, &extract_ctx))
        })
        .filter(|url| url.starts_with("http") || url.starts_with("data:"));

    InterpretedResponse {
        kind: if image_url.is_some() {
            ResponseKind::TextAndImage
        } else {
            ResponseKind::Text
        },
        body: clean_body(&text),
        image_url,
        status: ResponseStatus::Success,
        task_id: extract_ctx.task_id,
        gen_id: extract_ctx.gen_id,
    }
}

pub fn synthesize_asset_url(task_id: &str, gen_id: &str) -> String {
    format!("https://filesystem.site/vg-assets/assets/{task_id}/{gen_id}.png")
}

fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(rows)) => rows
            .iter()
            .filter(|row| row.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|row| row.get("text").and_then(Value::as_str))
            .collect::<Vec<&str>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn block_image_url(blocks: &[Value]) -> Option<String> {
    blocks
        .iter()
        .filter(|row| row.get("type").and_then(Value::as_str) == Some("image_url"))
        .find_map(|row| {
            row.get("image_url")
                .and_then(|value| value.get("url"))
                .or_else(|| row.get("url"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        })
}

fn extract_markdown_image(text: &str, _ctx: &ExtractContext) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"!\[[^\]]*\]\((https?://[^)]+)\)").expect("valid regex")
    });
    re.captures(text).map(|caps| caps[1].to_string())
}

fn extract_bare_url(text: &str, _ctx: &ExtractContext) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r#"https://[^\s"')\]]+"#).expect("valid regex"));
    re.find(text).map(|m| m.as_str().to_string())
}

fn extract_vendor_cdn(text: &str, _ctx: &ExtractContext) -> Option<String> {
    static OPENAI_RE: OnceLock<Regex> = OnceLock::new();
    static FILESYSTEM_RE: OnceLock<Regex> = OnceLock::new();
    let openai = OPENAI_RE
        .get_or_init(|| Regex::new(r#"(?i)https://sdmntpr[^"\s)]+"#).expect("valid regex"));
    if let Some(found) = openai.find(text) {
        return Some(found.as_str().to_string());
    }
    let filesystem = FILESYSTEM_RE.get_or_init(|| {
        Regex::new(r#"(?i)https://filesystem\.site/cdn/[^"\s)]+"#).expect("valid regex")
    });
    filesystem.find(text).map(|m| m.as_str().to_string())
}

fn extract_fenced_json(text: &str, _ctx: &ExtractContext) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\n```").expect("valid regex")
    });
    let raw = re.captures(text)?.get(1)?.as_str().trim().to_string();
    // A malformed fence falls through to the next strategy.
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed
        .get("image_url")
        .or_else(|| parsed.get("url"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn extract_id_synthesis(text: &str, ctx: &ExtractContext) -> Option<String> {
    // The gen token must appear in this reply; the task half may come from
    // an earlier one.
    let gen_id = find_gen_id(text)?;
    let task_id = ctx.task_id.as_deref()?;
    Some(synthesize_asset_url(task_id, &gen_id))
}

fn extract_download_link(text: &str, _ctx: &ExtractContext) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\[下载[^\]]*\]\((https://[^)]+)\)").expect("valid regex")
    });
    re.captures(text).map(|caps| caps[1].to_string())
}

fn extract_completion_recovery(text: &str, ctx: &ExtractContext) -> Option<String> {
    // The body only announces completion; both halves must already be known.
    if !progress::has_completion_marker(text) {
        return None;
    }
    let task_id = ctx.task_id.as_deref()?;
    let gen_id = ctx.gen_id.as_deref()?;
    Some(synthesize_asset_url(task_id, gen_id))
}

pub(crate) fn find_task_id(text: &str) -> Option<String> {
    static LABELED_RE: OnceLock<Regex> = OnceLock::new();
    static CN_LABELED_RE: OnceLock<Regex> = OnceLock::new();
    static BARE_RE: OnceLock<Regex> = OnceLock::new();
    let labeled = LABELED_RE.get_or_init(|| {
        Regex::new(r#"(?i)task_id[：:]\s*["`]?(task_[a-z0-9]+)["`]?"#).expect("valid regex")
    });
    if let Some(caps) = labeled.captures(text) {
        return Some(caps[1].to_string());
    }
    let cn_labeled = CN_LABELED_RE.get_or_init(|| {
        Regex::new(r#"任务ID[：:]\s*["`]?(task_[a-z0-9]+)["`]?"#).expect("valid regex")
    });
    if let Some(caps) = cn_labeled.captures(text) {
        return Some(caps[1].to_string());
    }
    let bare = BARE_RE.get_or_init(|| Regex::new(r"(?i)task_[a-z0-9]+").expect("valid regex"));
    bare.find(text).map(|m| m.as_str().to_string())
}

pub(crate) fn find_gen_id(text: &str) -> Option<String> {
    static LABELED_RE: OnceLock<Regex> = OnceLock::new();
    static CN_LABELED_RE: OnceLock<Regex> = OnceLock::new();
    static BARE_RE: OnceLock<Regex> = OnceLock::new();
    let labeled = LABELED_RE.get_or_init(|| {
        Regex::new(r#"(?i)gen_id[：:]\s*["`]?(gen_[a-z0-9]+)["`]?"#).expect("valid regex")
    });
    if let Some(caps) = labeled.captures(text) {
        return Some(caps[1].to_string());
    }
    let cn_labeled = CN_LABELED_RE.get_or_init(|| {
        Regex::new(r#"生成ID[：:]\s*["`]?(gen_[a-z0-9]+)["`]?"#).expect("valid regex")
    });
    if let Some(caps) = cn_labeled.captures(text) {
        return Some(caps[1].to_string());
    }
    let bare = BARE_RE.get_or_init(|| Regex::new(r"(?i)gen_[a-z0-9]+").expect("valid regex"));
    bare.find(text).map(|m| m.as_str().to_string())
}

/// Produces the display body: fenced JSON blocks, markdown image tags and
/// in-flight progress lines go away, then runs of blank lines shrink to one.
pub fn clean_body(text: &str) -> String {
    static FENCE_RE: OnceLock<Regex> = OnceLock::new();
    static IMAGE_RE: OnceLock<Regex> = OnceLock::new();
    static PROGRESS_RE: OnceLock<Regex> = OnceLock::new();
    static BLANK_RE: OnceLock<Regex> = OnceLock::new();

    let fences = FENCE_RE
        .get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*\n.*?\n```").expect("valid regex"));
    let images = IMAGE_RE
        .get_or_init(|| Regex::new(r"!\[[^\]]*\]\(https?://[^)]+\)").expect("valid regex"));
    let progress = PROGRESS_RE.get_or_init(|| {
        Regex::new(r"(?m)\s*(?:\d+[%％])?\s*(?:生成中|处理中|排队中)[^\n]*$").expect("valid regex")
    });
    let blanks = BLANK_RE.get_or_init(|| Regex::new(r"\n{3,}").expect("valid regex"));

    let cleaned = fences.replace_all(text, "");
    let cleaned = images.replace_all(&cleaned, "");
    let cleaned = progress.replace_all(&cleaned, "");
    let cleaned = cleaned.trim().to_string();
    blanks.replace_all(&cleaned, "\n\n").to_string()
}
