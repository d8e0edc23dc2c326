use indexmap::IndexMap;

use crate::session::Operation;

/// A selectable preset. `prompt` is the fixed vendor-facing template that
/// seeds the editable instruction when the preset is picked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StyleSpec {
    pub key: &'static str,
    pub title: &'static str,
    pub prompt: &'static str,
}

pub const STYLE_PRESETS: &[StyleSpec] = &[
    StyleSpec {
        key: "anime",
        title: "动漫",
        prompt: "动漫风格，清新可爱的日系动漫风格",
    },
    StyleSpec {
        key: "oil",
        title: "油画",
        prompt: "油画风格，厚重的笔触和丰富的色彩",
    },
    StyleSpec {
        key: "sketch",
        title: "素描",
        prompt: "素描风格，黑白素描效果",
    },
    StyleSpec {
        key: "pixel",
        title: "像素",
        prompt: "像素艺术风格，复古游戏像素效果",
    },
    StyleSpec {
        key: "watercolor",
        title: "水彩",
        prompt: "水彩画风格，轻盈透明的水彩效果",
    },
    StyleSpec {
        key: "comic",
        title: "漫画",
        prompt: "漫画风格，美式漫画风格，强调线条和分块色彩",
    },
    StyleSpec {
        key: "vintage",
        title: "复古",
        prompt: "复古风格，复古照片效果，怀旧色调",
    },
    StyleSpec {
        key: "cyberpunk",
        title: "赛博朋克",
        prompt: "赛博朋克风格，霓虹灯效果和未来感",
    },
];

pub const CREATIVE_PRESETS: &[StyleSpec] = &[
    StyleSpec {
        key: "creative",
        title: "创意变体",
        prompt: "基于图片创建创意变体",
    },
    StyleSpec {
        key: "poster",
        title: "艺术海报",
        prompt: "将图片转换为艺术海报",
    },
    StyleSpec {
        key: "sticker",
        title: "可爱贴纸",
        prompt: "将主体转换为可爱的贴纸，带有白色边框",
    },
];

pub const FALLBACK_STYLE_PROMPT: &str = "艺术风格";
pub const FALLBACK_CREATIVE_PROMPT: &str = "创意变体";

/// Hint prompts shown in the input step, three per operation.
pub fn sample_prompts(operation: Operation) -> &'static [&'static str] {
    match operation {
        Operation::Generate => &[
            "一只戴着宇航员头盔的柴犬，数字艺术",
            "夕阳下的江南水乡，水彩风格",
            "赛博朋克城市夜景，霓虹灯光",
        ],
        Operation::Style => &[
            "将图片转换为动漫风格，清新可爱",
            "转换为厚重笔触的油画效果",
            "黑白素描，强调光影对比",
        ],
        Operation::Creative => &[
            "将主体做成可爱的贴纸",
            "设计成复古电影海报",
            "基于图片创建超现实拼贴",
        ],
    }
}

pub fn presets_for(operation: Operation) -> &'static [StyleSpec] {
    match operation {
        Operation::Style => STYLE_PRESETS,
        Operation::Creative => CREATIVE_PRESETS,
        Operation::Generate => &[],
    }
}

/// Insertion-ordered lookup over the preset tables.
#[derive(Debug, Clone, Default)]
pub struct StyleCatalog {
    styles: IndexMap<&'static str, StyleSpec>,
    creative: IndexMap<&'static str, StyleSpec>,
}

impl StyleCatalog {
    pub fn new() -> Self {
        Self {
            styles: STYLE_PRESETS
                .iter()
                .map(|spec| (spec.key, *spec))
                .collect(),
            creative: CREATIVE_PRESETS
                .iter()
                .map(|spec| (spec.key, *spec))
                .collect(),
        }
    }

    pub fn get(&self, operation: Operation, key: &str) -> Option<&StyleSpec> {
        match operation {
            Operation::Style => self.styles.get(key),
            Operation::Creative => self.creative.get(key),
            Operation::Generate => None,
        }
    }

    /// The prompt template for a preset key, falling back to the generic
    /// per-operation prompt for unknown keys.
    pub fn prompt_for(&self, operation: Operation, key: &str) -> &'static str {
        match self.get(operation, key) {
            Some(spec) => spec.prompt,
            None => match operation {
                Operation::Creative => FALLBACK_CREATIVE_PROMPT,
                _ => FALLBACK_STYLE_PROMPT,
            },
        }
    }

    pub fn keys(&self, operation: Operation) -> Vec<&'static str> {
        presets_for(operation).iter().map(|spec| spec.key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_preserves_preset_order() {
        let catalog = StyleCatalog::new();
        assert_eq!(catalog.keys(Operation::Style).first(), Some(&"anime"));
        assert_eq!(
            catalog.keys(Operation::Creative),
            vec!["creative", "poster", "sticker"]
        );
    }

    #[test]
    fn prompt_for_resolves_presets_and_falls_back() {
        let catalog = StyleCatalog::new();
        assert_eq!(
            catalog.prompt_for(Operation::Style, "anime"),
            "动漫风格，清新可爱的日系动漫风格"
        );
        assert_eq!(
            catalog.prompt_for(Operation::Style, "unknown"),
            FALLBACK_STYLE_PROMPT
        );
        assert_eq!(
            catalog.prompt_for(Operation::Creative, "unknown"),
            FALLBACK_CREATIVE_PROMPT
        );
    }

    #[test]
    fn generate_has_no_presets() {
        let catalog = StyleCatalog::new();
        assert!(catalog.get(Operation::Generate, "anime").is_none());
        assert!(presets_for(Operation::Generate).is_empty());
        assert_eq!(sample_prompts(Operation::Generate).len(), 3);
    }
}
