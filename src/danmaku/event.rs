use crate::core::Result;
use log::{info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// 弹幕类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptionKind {
    /// 从右向左滚动
    #[default]
    Scroll,
    /// 顶部固定
    Top,
    /// 底部固定
    Bottom,
}

impl CaptionKind {
    pub fn is_fixed(&self) -> bool {
        !matches!(self, CaptionKind::Scroll)
    }
}

/// 一条弹幕
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionEvent {
    /// 出现时间（秒，媒体时间）
    pub time: f64,
    pub text: String,
    /// 0xRRGGBB
    #[serde(default = "default_color", deserialize_with = "deserialize_color")]
    pub color: u32,
    #[serde(default)]
    pub kind: CaptionKind,
}

impl CaptionEvent {
    pub fn new(time: f64, text: impl Into<String>, kind: CaptionKind) -> Self {
        Self {
            time,
            text: text.into(),
            color: default_color(),
            kind,
        }
    }

    pub fn with_color(mut self, color: u32) -> Self {
        self.color = color & 0xFF_FFFF;
        self
    }
}

fn default_color() -> u32 {
    0xFF_FFFF
}

/// 颜色既可以是整数，也可以是 "#RRGGBB"
#[derive(Deserialize)]
#[serde(untagged)]
enum ColorValue {
    Int(u32),
    Hex(String),
}

fn deserialize_color<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    match ColorValue::deserialize(deserializer)? {
        ColorValue::Int(value) => Ok(value & 0xFF_FFFF),
        ColorValue::Hex(text) => parse_hex_color(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("无效的颜色: {}", text))),
    }
}

fn parse_hex_color(text: &str) -> Option<u32> {
    let hex = text.trim().trim_start_matches('#');
    if hex.len() != 6 {
        return None;
    }
    u32::from_str_radix(hex, 16).ok()
}

/// 按时间排序、已去重的弹幕轨
#[derive(Debug, Clone, Default)]
pub struct CaptionTrack {
    events: Vec<CaptionEvent>,
}

impl CaptionTrack {
    /// 排序并去掉同一时间、同一文本的重复弹幕
    pub fn new(events: Vec<CaptionEvent>) -> Self {
        let total = events.len();
        let mut events: Vec<CaptionEvent> =
            events.into_iter().filter(|e| e.time.is_finite()).collect();
        events.sort_by(|a, b| a.time.total_cmp(&b.time));

        let mut seen = HashSet::new();
        events.retain(|e| seen.insert((e.time.to_bits(), e.text.clone())));

        if events.len() < total {
            warn!("弹幕轨去除 {} 条重复或无效弹幕", total - events.len());
        }
        Self { events }
    }

    /// 从 JSON 数组解析
    pub fn from_json_str(content: &str) -> Result<Self> {
        let events: Vec<CaptionEvent> = serde_json::from_str(content)?;
        Ok(Self::new(events))
    }

    /// 从 JSON 文件加载
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let track = Self::from_json_str(&content)?;
        info!("💬 已加载弹幕: {} 条 ({})", track.len(), path.display());
        Ok(track)
    }

    pub fn get(&self, index: usize) -> Option<&CaptionEvent> {
        self.events.get(index)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CaptionEvent> {
        self.events.iter()
    }
}
