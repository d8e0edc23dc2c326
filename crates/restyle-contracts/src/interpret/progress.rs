use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use super::{find_gen_id, find_task_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Queuing,
    Generating,
    Unspecified,
}

/// In-flight progress markers pulled out of a reply body. `None` from
/// [`extract_progress_info`] means the body carries no progress signal at
/// all and should be treated as a final answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressInfo {
    pub percentage: u8,
    pub stage: ProgressStage,
    pub completed: bool,
    pub task_id: Option<String>,
    pub gen_id: Option<String>,
    pub progress_text: String,
}

/// Completion is declared by 生成完成/处理完成, a checkmark, a literal 100%,
/// or 完成 co-occurring with 100.
pub fn has_completion_marker(content: &str) -> bool {
    content.contains("生成完成")
        || content.contains("处理完成")
        || content.contains("✅")
        || content.contains("100%")
        || (content.contains("完成") && content.contains("100"))
}

pub fn extract_progress_info(content: &str) -> Option<ProgressInfo> {
    if content.is_empty() {
        return None;
    }

    let task_id = find_task_id(content);
    let gen_id = find_gen_id(content);

    let mut percentage = 0u8;
    let mut stage = ProgressStage::Unspecified;
    let completed = has_completion_marker(content);
    if completed {
        percentage = 100;
    } else {
        if let Some(value) = find_percentage(content) {
            percentage = value;
        }
        if content.contains("排队中") {
            stage = ProgressStage::Queuing;
            if percentage == 0 {
                percentage = 5;
            }
        } else if content.contains("生成中") || content.contains("处理中") {
            stage = ProgressStage::Generating;
            if percentage == 0 {
                percentage = 20;
            }
        }
    }

    let progress_text = progress_line(content).unwrap_or_default();

    if task_id.is_none() && gen_id.is_none() && percentage == 0 && progress_text.is_empty() {
        return None;
    }

    Some(ProgressInfo {
        percentage,
        stage,
        completed,
        task_id,
        gen_id,
        progress_text,
    })
}

fn find_percentage(content: &str) -> Option<u8> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(\d+)[%％]").expect("valid regex"));
    let caps = re.captures(content)?;
    caps[1].parse::<u64>().ok().map(|value| value.min(100) as u8)
}

fn progress_line(content: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?m)^.*(?:\d+[%％]|排队中|生成中|处理中|生成完成|处理完成).*$")
            .expect("valid regex")
    });
    re.find(content).map(|m| m.as_str().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_line_reports_one_hundred_percent() {
        let info = extract_progress_info("生成完成 100%").unwrap();
        assert!(info.completed);
        assert_eq!(info.percentage, 100);
        assert_eq!(info.progress_text, "生成完成 100%");
    }

    #[test]
    fn queuing_defaults_to_five_percent() {
        let info = extract_progress_info("排队中").unwrap();
        assert_eq!(info.stage, ProgressStage::Queuing);
        assert_eq!(info.percentage, 5);
        assert!(!info.completed);
    }

    #[test]
    fn generating_defaults_to_twenty_percent_without_a_number() {
        let info = extract_progress_info("图像生成中，请稍候").unwrap();
        assert_eq!(info.stage, ProgressStage::Generating);
        assert_eq!(info.percentage, 20);
    }

    #[test]
    fn explicit_percentage_beats_the_stage_default() {
        let info = extract_progress_info("45% 生成中").unwrap();
        assert_eq!(info.stage, ProgressStage::Generating);
        assert_eq!(info.percentage, 45);
    }

    #[test]
    fn fullwidth_percent_sign_is_accepted() {
        let info = extract_progress_info("处理中 60％").unwrap();
        assert_eq!(info.percentage, 60);
    }

    #[test]
    fn ids_alone_are_enough_to_report_progress() {
        let info = extract_progress_info("任务ID：task_q1 已受理").unwrap();
        assert_eq!(info.task_id.as_deref(), Some("task_q1"));
        assert_eq!(info.percentage, 0);
        assert_eq!(info.stage, ProgressStage::Unspecified);
    }

    #[test]
    fn plain_prose_reports_nothing() {
        assert!(extract_progress_info("这是一段与进度无关的回复。").is_none());
        assert!(extract_progress_info("").is_none());
    }

    #[test]
    fn checkmark_and_co_occurrence_both_mean_completed() {
        assert!(extract_progress_info("✅ 任务结束").unwrap().completed);
        assert!(extract_progress_info("已完成，用时 100 秒").unwrap().completed);
    }

    #[test]
    fn oversized_percentages_clamp_to_one_hundred() {
        let info = extract_progress_info("250% 处理中").unwrap();
        assert_eq!(info.percentage, 100);
    }
}
