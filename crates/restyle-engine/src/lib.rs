use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use restyle_contracts::events::{EventFields, SessionLog};
use restyle_contracts::interpret::progress::{extract_progress_info, ProgressInfo};
use restyle_contracts::interpret::{
    interpret, synthesize_asset_url, InterpretContext, InterpretedResponse,
};
use restyle_contracts::session::{mime_for_name, ImagePolicy, Operation};
use restyle_contracts::wizard::Submission;
use serde_json::{json, Value};

pub const DEFAULT_API_BASE: &str = "https://yunwu.ai/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-image-vip";
pub const REQUEST_TIMEOUT_SECS: u64 = 180;
pub const POLL_INTERVAL_SECS: u64 = 3;
pub const POLL_MAX_ATTEMPTS: u32 = 60;

const TEMPERATURE: f64 = 0.7;
const MAX_TOKENS: u64 = 4000;

const SYSTEM_PROMPT_WITH_IMAGE: &str = "你是一个专业的图像处理助手。请根据用户的请求处理图像。\
请确保保留原始图像的主体特征，仅应用风格变化。请严格按照用户的指示进行图像处理。\
输出的图像应与输入图像的尺寸相同。对于图片处理，请详细解释你做了什么。";
const SYSTEM_PROMPT_TEXT_ONLY: &str = "你是一个专业的图像生成助手。\
请根据用户的文字描述生成精美的图像，并在回复中提供图像链接。";

const ERROR_SUGGESTIONS: &str = "Suggestions: check your network connection, wait a moment and \
retry, or try a different description or image.";

/// Vendor endpoint settings. The key is never embedded in source; it comes
/// from the environment at startup.
#[derive(Debug, Clone)]
pub struct VendorConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
}

impl VendorConfig {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let api_base: String = api_base.into();
        Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let Some(api_key) = non_empty_env("RESTYLE_API_KEY") else {
            bail!("RESTYLE_API_KEY not set");
        };
        let api_base = non_empty_env("RESTYLE_API_BASE")
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let model = non_empty_env("RESTYLE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Ok(Self::new(api_base, api_key, model))
    }

    pub fn chat_completions_endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Sleep seam so polling tests can run without real delays.
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Cooperative cancellation checked at every poll boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Bounded wait schedule: at most `max_attempts` sleeps of `interval` each,
/// aborting early once the token trips.
#[derive(Debug)]
pub struct PollSchedule {
    attempts: u32,
    max_attempts: u32,
    interval: Duration,
}

impl PollSchedule {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            interval,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Sleeps one interval and reports whether another probe may run.
    pub fn wait_next(&mut self, clock: &dyn Clock, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() || self.attempts >= self.max_attempts {
            return false;
        }
        clock.sleep(self.interval);
        self.attempts += 1;
        !cancel.is_cancelled()
    }
}

/// An upload prepared for the wire: inlined data URI plus probed dimensions.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub data_url: String,
    pub width: u32,
    pub height: u32,
}

impl ImageAttachment {
    pub fn from_path(path: &Path) -> Result<Self> {
        let (width, height) = image::image_dimensions(path)
            .with_context(|| format!("cannot probe dimensions of {}", path.display()))?;
        let bytes =
            fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("image.png");
        let mime = mime_for_name(name).unwrap_or("image/png");
        Ok(Self {
            data_url: format!("data:{mime};base64,{}", BASE64.encode(bytes)),
            width,
            height,
        })
    }

    pub fn ratio(&self) -> String {
        format!("{}:{}", self.width, self.height)
    }
}

/// Wraps the resolved prompt in the per-operation directive. Generate sends
/// the user's text untouched.
pub fn build_instruction(operation: Operation, prompt: &str) -> String {
    match operation {
        Operation::Style => format!(
            "请将这张图片转换为以下风格：{prompt}。请保持图像主体特征，仅应用风格变化。"
        ),
        Operation::Creative => format!(
            "请基于这张图片创建以下效果：{prompt}。请保持主体识别性，但可以添加创意元素。"
        ),
        Operation::Generate => prompt.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct ComposedRequest {
    pub endpoint: String,
    pub body: Value,
}

/// Builds the exact chat-completion body the vendor expects. The system
/// message differs by attachment; an attached image rides as a data URI in a
/// content-block list, while text-only requests use plain string content.
pub fn compose(
    config: &VendorConfig,
    instruction: &str,
    attachment: Option<&ImageAttachment>,
) -> ComposedRequest {
    let mut messages = Vec::new();
    match attachment {
        Some(attachment) => {
            messages.push(json!({
                "role": "system",
                "content": SYSTEM_PROMPT_WITH_IMAGE,
            }));
            let user_text = format!(
                "{instruction}\n请确保输出图像与输入图像尺寸相同，比例为 {}。\
请严格保持图像的主体特征，仅应用风格变化。",
                attachment.ratio()
            );
            messages.push(json!({
                "role": "user",
                "content": [
                    {"type": "text", "text": user_text},
                    {"type": "image_url", "image_url": {"url": attachment.data_url}}
                ],
            }));
        }
        None => {
            messages.push(json!({
                "role": "system",
                "content": SYSTEM_PROMPT_TEXT_ONLY,
            }));
            messages.push(json!({
                "role": "user",
                "content": instruction,
            }));
        }
    }

    ComposedRequest {
        endpoint: config.chat_completions_endpoint(),
        body: json!({
            "model": config.model,
            "messages": messages,
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
        }),
    }
}

/// Maps known vendor failure phrasings to more specific guidance.
pub fn classify_vendor_failure(text: &str) -> Option<&'static str> {
    let lowered = text.to_ascii_lowercase();
    if text.contains("崩溃") || lowered.contains("crash") {
        return Some(
            "The vendor reported a crash while rendering; retry with a simpler prompt or a \
smaller image.",
        );
    }
    if text.contains("饱和") || text.contains("繁忙") || lowered.contains("saturat") {
        return Some("The vendor's generation channels are saturated; wait a little and retry.");
    }
    None
}

fn error_with_suggestions(message: impl AsRef<str>) -> InterpretedResponse {
    let message = message.as_ref();
    let specific = classify_vendor_failure(message);
    let mut body = message.trim().to_string();
    if let Some(line) = specific {
        body.push_str("\n");
        body.push_str(line);
    }
    body.push_str("\n");
    body.push_str(ERROR_SUGGESTIONS);
    InterpretedResponse::error(body)
}

struct SendOutcome {
    response: InterpretedResponse,
    raw_text: String,
}

/// One wizard submission end to end: compose, send, interpret, poll while
/// the vendor reports progress, and fall back to delayed-response recovery
/// on timeout. Owns the session's event log and identifier memory.
pub struct SessionEngine {
    session_dir: PathBuf,
    session_id: String,
    log: SessionLog,
    config: VendorConfig,
    http: HttpClient,
    clock: Box<dyn Clock>,
    cancel: CancelToken,
    last_payload: Option<Value>,
    task_id: Option<String>,
    gen_id: Option<String>,
}

impl SessionEngine {
    pub fn new(session_dir: impl Into<PathBuf>, config: VendorConfig) -> Result<Self> {
        Self::with_clock(session_dir, config, Box::new(SystemClock))
    }

    pub fn with_clock(
        session_dir: impl Into<PathBuf>,
        config: VendorConfig,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        let session_dir = session_dir.into();
        fs::create_dir_all(&session_dir)?;
        let session_id = session_dir
            .file_name()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("session-{}", uuid::Uuid::new_v4()));
        let log = SessionLog::new(session_dir.join("events.jsonl"), session_id.clone());
        log.append(
            "session_started",
            fields(json!({
                "out_dir": session_dir.to_string_lossy().to_string(),
                "model": config.model,
            })),
        )?;
        Ok(Self {
            session_dir,
            session_id,
            log,
            config,
            http: HttpClient::new(),
            clock,
            cancel: CancelToken::new(),
            last_payload: None,
            task_id: None,
            gen_id: None,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn known_ids(&self) -> (Option<&str>, Option<&str>) {
        (self.task_id.as_deref(), self.gen_id.as_deref())
    }

    /// Vendor and transport failures fold into an error-status response;
    /// `Err` is reserved for local faults such as an unwritable log.
    pub fn submit(&mut self, submission: &Submission) -> Result<InterpretedResponse> {
        if submission.prompt.trim().is_empty() {
            return Ok(error_with_suggestions("the instruction text is empty"));
        }
        if submission.operation.image_policy() == ImagePolicy::Required
            && submission.image.is_none()
        {
            return Ok(error_with_suggestions(
                "this operation needs an uploaded image",
            ));
        }

        let attachment = match &submission.image {
            Some(upload) if submission.operation.image_policy() != ImagePolicy::NotAccepted => {
                match ImageAttachment::from_path(&upload.path) {
                    Ok(attachment) => Some(attachment),
                    Err(err) => {
                        return Ok(error_with_suggestions(format!(
                            "cannot prepare {}: {err:#}",
                            upload.name
                        )))
                    }
                }
            }
            _ => None,
        };

        let instruction = build_instruction(submission.operation, &submission.prompt);
        self.log.append(
            "request_sent",
            fields(json!({
                "operation": submission.operation.key(),
                "style": submission.style_key,
                "has_image": attachment.is_some(),
            })),
        )?;

        let outcome = self.send_once(&instruction, attachment.as_ref(), true)?;
        let response = if outcome.response.is_error() || outcome.response.has_image() {
            outcome.response
        } else {
            match extract_progress_info(&outcome.raw_text) {
                Some(progress) if !progress.completed && self.task_id.is_some() => {
                    self.poll_for_completion(outcome.response, &progress)?
                }
                _ => outcome.response,
            }
        };

        self.log.append(
            "response_interpreted",
            fields(json!({
                "kind": response.kind,
                "status": response.status,
                "has_image": response.has_image(),
            })),
        )?;
        Ok(response)
    }

    fn interpret_context(&self) -> InterpretContext {
        InterpretContext {
            prior_task_id: self.task_id.clone(),
            prior_gen_id: self.gen_id.clone(),
        }
    }

    fn send_once(
        &mut self,
        instruction: &str,
        attachment: Option<&ImageAttachment>,
        allow_recovery: bool,
    ) -> Result<SendOutcome> {
        let request = compose(&self.config, instruction, attachment);
        let sent = self
            .http
            .post(&request.endpoint)
            .bearer_auth(&self.config.api_key)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(&request.body)
            .send();

        let response = match sent {
            Ok(response) => response,
            Err(err) if err.is_timeout() && allow_recovery => {
                self.log.append(
                    "recovery_attempted",
                    fields(json!({"reason": "timeout"})),
                )?;
                if let Some(recovered) = self.recover_delayed_response()? {
                    return Ok(SendOutcome {
                        raw_text: recovered.body.clone(),
                        response: recovered,
                    });
                }
                return Ok(SendOutcome {
                    response: error_with_suggestions(format!(
                        "the request timed out after {REQUEST_TIMEOUT_SECS}s"
                    )),
                    raw_text: String::new(),
                });
            }
            Err(err) => {
                return Ok(SendOutcome {
                    response: error_with_suggestions(format!("the request failed: {err}")),
                    raw_text: String::new(),
                });
            }
        };

        let payload = match response_json_or_error(response) {
            Ok(payload) => payload,
            Err(err) => {
                return Ok(SendOutcome {
                    response: error_with_suggestions(format!("{err:#}")),
                    raw_text: String::new(),
                });
            }
        };

        self.last_payload = Some(payload.clone());
        let interpreted = interpret(&payload, &self.interpret_context());
        self.remember_ids(&interpreted);
        let raw_text = raw_content_text(&payload);
        Ok(SendOutcome {
            response: interpreted,
            raw_text,
        })
    }

    fn remember_ids(&mut self, response: &InterpretedResponse) {
        if let Some(task) = response.task_id.as_deref().filter(|v| !v.is_empty()) {
            self.task_id = Some(task.to_string());
        }
        if let Some(gen) = response.gen_id.as_deref().filter(|v| !v.is_empty()) {
            self.gen_id = Some(gen.to_string());
        }
    }

    /// Probes the vendor while it reports an unfinished task, at most
    /// [`POLL_MAX_ATTEMPTS`] times with [`POLL_INTERVAL_SECS`] between
    /// probes, stopping early on an image, a completion marker, or a
    /// tripped cancel token.
    fn poll_for_completion(
        &mut self,
        initial: InterpretedResponse,
        progress: &ProgressInfo,
    ) -> Result<InterpretedResponse> {
        let Some(task_id) = self.task_id.clone() else {
            return Ok(initial);
        };
        let mut last = initial;
        let mut last_percentage = progress.percentage;
        let mut schedule = PollSchedule::new(
            POLL_MAX_ATTEMPTS,
            Duration::from_secs(POLL_INTERVAL_SECS),
        );
        let cancel = self.cancel.clone();
        while schedule.wait_next(self.clock.as_ref(), &cancel) {
            let probe = self.send_once(&format!("查询任务进度: {task_id}"), None, false)?;
            let probe_progress = extract_progress_info(&probe.raw_text);
            if let Some(info) = &probe_progress {
                last_percentage = info.percentage.max(last_percentage);
            }
            self.log.append(
                "poll_tick",
                fields(json!({
                    "attempt": schedule.attempts(),
                    "percentage": last_percentage,
                    "stage": probe_progress.as_ref().map(|info| info.stage),
                })),
            )?;
            if probe.response.has_image() {
                return Ok(probe.response);
            }
            if probe_progress
                .as_ref()
                .map(|info| info.completed)
                .unwrap_or(false)
            {
                return Ok(probe.response);
            }
            if !probe.response.is_error() {
                last = probe.response;
            }
        }
        Ok(last)
    }

    /// Best-effort read of a result that arrived after we stopped waiting:
    /// one identifier-keyed query, then a re-interpretation of the last raw
    /// payload.
    pub fn recover_delayed_response(&mut self) -> Result<Option<InterpretedResponse>> {
        if let (Some(task), Some(gen)) = (self.task_id.clone(), self.gen_id.clone()) {
            let probe = self.send_once(
                &format!("查询任务: {task}, 生成ID: {gen}"),
                None,
                false,
            )?;
            if probe.response.has_image() {
                self.log.append(
                    "recovery_attempted",
                    fields(json!({"reason": "query", "found": true})),
                )?;
                return Ok(Some(probe.response));
            }
        }
        if let Some(payload) = self.last_payload.clone() {
            let reprocessed = interpret(&payload, &self.interpret_context());
            if reprocessed.has_image() {
                self.log.append(
                    "recovery_attempted",
                    fields(json!({"reason": "reinterpret", "found": true})),
                )?;
                return Ok(Some(reprocessed));
            }
        }
        Ok(None)
    }

    /// Saves the result image into the session directory, trying the
    /// alternate vendor asset templates when the primary URL is not
    /// fetchable. The file name prefers the URL's gen identifier.
    pub fn download_result(&self, url: &str) -> Result<PathBuf> {
        let mut candidates = vec![url.to_string()];
        if let (Some(task), Some(gen)) = (self.task_id.as_deref(), self.gen_id.as_deref()) {
            for alternate in alternate_asset_urls(task, gen) {
                if alternate != url {
                    candidates.push(alternate);
                }
            }
        }

        let mut last_error = None;
        for candidate in &candidates {
            match self.fetch_bytes(candidate) {
                Ok(bytes) => {
                    let path = self.session_dir.join(result_file_name(candidate));
                    fs::write(&path, &bytes)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    self.log.append(
                        "image_saved",
                        fields(json!({
                            "path": path.to_string_lossy().to_string(),
                            "bytes": bytes.len(),
                            "url": candidate,
                        })),
                    )?;
                    return Ok(path);
                }
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no download candidates for {url}")))
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .with_context(|| format!("failed downloading result image ({url})"))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            bail!("result image download failed ({code}): {url}");
        }
        Ok(response
            .bytes()
            .context("failed reading result image bytes")?
            .to_vec())
    }

    pub fn finish(&self) -> Result<()> {
        self.log.append("session_finished", EventFields::new())?;
        Ok(())
    }
}

/// The alternate hosts the vendor serves finished assets from, in the order
/// worth trying.
pub fn alternate_asset_urls(task_id: &str, gen_id: &str) -> Vec<String> {
    vec![
        synthesize_asset_url(task_id, gen_id),
        format!("https://videoopenai.filesystem.site/vg-assets/assets/{task_id}/{gen_id}.png"),
        format!("https://videoopenai.filesystem.site/vg-assets/assets%2F{task_id}%2F{gen_id}.png"),
    ]
}

fn result_file_name(url: &str) -> String {
    static GEN_RE: OnceLock<Regex> = OnceLock::new();
    let re = GEN_RE
        .get_or_init(|| Regex::new(r"(gen_[a-z0-9]+)\.png").expect("valid regex"));
    if let Some(caps) = re.captures(url) {
        return format!("restyle_{}.png", &caps[1]);
    }
    format!("restyle_{}.png", timestamp_millis())
}

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}

fn raw_content_text(payload: &Value) -> String {
    payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn response_json_or_error(response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .context("vendor response body read failed")?;
    if !status.is_success() {
        bail!(
            "vendor request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value =
        serde_json::from_str(&body).context("vendor returned invalid JSON payload")?;
    Ok(parsed)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn fields(value: Value) -> EventFields {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use image::{Rgb, RgbImage};
    use serde_json::json;

    use super::*;

    fn test_config() -> VendorConfig {
        VendorConfig::new("https://vendor.test/v1/", "sk-test", DEFAULT_MODEL)
    }

    #[derive(Default)]
    struct CountingClock {
        sleeps: Mutex<Vec<Duration>>,
    }

    impl Clock for CountingClock {
        fn sleep(&self, duration: Duration) {
            self.sleeps.lock().expect("clock lock").push(duration);
        }
    }

    #[test]
    fn config_trims_the_api_base() {
        let config = test_config();
        assert_eq!(
            config.chat_completions_endpoint(),
            "https://vendor.test/v1/chat/completions"
        );
    }

    #[test]
    fn generate_request_has_no_image_part_and_text_only_system_prompt() {
        let config = test_config();
        let instruction = build_instruction(Operation::Generate, "a red bicycle");
        let request = compose(&config, &instruction, None);

        assert_eq!(request.body["model"], json!(DEFAULT_MODEL));
        assert_eq!(request.body["temperature"], json!(0.7));
        assert_eq!(request.body["max_tokens"], json!(4000));

        let messages = request.body["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["content"], json!(SYSTEM_PROMPT_TEXT_ONLY));
        assert_eq!(messages[1]["content"], json!("a red bicycle"));
        assert!(!request.body.to_string().contains("image_url"));
    }

    #[test]
    fn image_request_inlines_a_data_uri_and_dimension_directive() {
        let config = test_config();
        let attachment = ImageAttachment {
            data_url: "data:image/png;base64,QUJD".to_string(),
            width: 640,
            height: 480,
        };
        let instruction = build_instruction(Operation::Style, "油画风格，厚重的笔触和丰富的色彩");
        let request = compose(&config, &instruction, Some(&attachment));

        let messages = request.body["messages"].as_array().expect("messages");
        assert_eq!(messages[0]["content"], json!(SYSTEM_PROMPT_WITH_IMAGE));
        let content = messages[1]["content"].as_array().expect("content blocks");
        assert_eq!(content.len(), 2);
        let text = content[0]["text"].as_str().expect("text part");
        assert!(text.contains("请将这张图片转换为以下风格"));
        assert!(text.contains("640:480"));
        assert_eq!(
            content[1]["image_url"]["url"],
            json!("data:image/png;base64,QUJD")
        );
    }

    #[test]
    fn creative_and_generate_wrappers_differ() {
        let style = build_instruction(Operation::Style, "素描风格");
        let creative = build_instruction(Operation::Creative, "艺术海报");
        let generate = build_instruction(Operation::Generate, "一座灯塔");
        assert!(style.starts_with("请将这张图片转换为以下风格"));
        assert!(creative.starts_with("请基于这张图片创建以下效果"));
        assert_eq!(generate, "一座灯塔");
    }

    #[test]
    fn attachment_probes_real_dimensions() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("tiny.png");
        let mut canvas = RgbImage::new(6, 4);
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([12, 200, 64]);
        }
        canvas.save(&path)?;

        let attachment = ImageAttachment::from_path(&path)?;
        assert_eq!((attachment.width, attachment.height), (6, 4));
        assert_eq!(attachment.ratio(), "6:4");
        assert!(attachment.data_url.starts_with("data:image/png;base64,"));
        Ok(())
    }

    #[test]
    fn poll_schedule_is_bounded() {
        let clock = CountingClock::default();
        let cancel = CancelToken::new();
        let mut schedule = PollSchedule::new(3, Duration::from_secs(3));
        let mut ticks = 0;
        while schedule.wait_next(&clock, &cancel) {
            ticks += 1;
        }
        assert_eq!(ticks, 3);
        assert_eq!(clock.sleeps.lock().expect("clock lock").len(), 3);
    }

    #[test]
    fn poll_schedule_stops_when_cancelled() {
        let clock = CountingClock::default();
        let cancel = CancelToken::new();
        let mut schedule = PollSchedule::new(60, Duration::from_secs(3));
        assert!(schedule.wait_next(&clock, &cancel));
        cancel.cancel();
        assert!(!schedule.wait_next(&clock, &cancel));
        assert_eq!(schedule.attempts(), 1);
    }

    #[test]
    fn vendor_failure_strings_map_to_specific_guidance() {
        assert!(classify_vendor_failure("服务器崩溃，请稍后再试").is_some());
        assert!(classify_vendor_failure("生成通道已饱和").is_some());
        assert!(classify_vendor_failure("just a plain error").is_none());
    }

    #[test]
    fn error_responses_carry_suggestions() {
        let response = error_with_suggestions("the request failed: connection refused");
        assert!(response.is_error());
        assert!(response.body.contains("connection refused"));
        assert!(response.body.contains("Suggestions:"));
    }

    #[test]
    fn submit_rejects_missing_required_image_without_network() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine =
            SessionEngine::with_clock(temp.path().join("s1"), test_config(), Box::new(CountingClock::default()))?;
        let submission = Submission {
            operation: Operation::Style,
            style_key: Some("anime".to_string()),
            prompt: "动漫风格".to_string(),
            image: None,
        };
        let response = engine.submit(&submission)?;
        assert!(response.is_error());
        assert!(response.body.contains("needs an uploaded image"));
        Ok(())
    }

    #[test]
    fn engine_writes_session_lifecycle_events() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let dir = temp.path().join("session-a");
        let engine = SessionEngine::new(&dir, test_config())?;
        assert_eq!(engine.session_id(), "session-a");
        engine.finish()?;

        let raw = std::fs::read_to_string(dir.join("events.jsonl"))?;
        let kinds: Vec<String> = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert_eq!(kinds, vec!["session_started", "session_finished"]);
        Ok(())
    }

    #[test]
    fn alternate_asset_urls_cover_both_hosts() {
        let urls = alternate_asset_urls("task_x", "gen_y");
        assert_eq!(
            urls[0],
            "https://filesystem.site/vg-assets/assets/task_x/gen_y.png"
        );
        assert!(urls[1].contains("videoopenai.filesystem.site"));
        assert!(urls[2].contains("%2Ftask_x%2F") || urls[2].contains("assets%2Ftask_x"));
    }

    #[test]
    fn result_file_name_prefers_the_gen_id() {
        assert_eq!(
            result_file_name("https://filesystem.site/vg-assets/assets/task_x/gen_y9.png"),
            "restyle_gen_y9.png"
        );
        assert!(result_file_name("https://cdn.example/img").starts_with("restyle_"));
    }
}
