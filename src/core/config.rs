use crate::core::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 解码管线配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 视频帧队列容量
    pub video_queue_capacity: usize,
    /// 音频帧队列容量
    pub audio_queue_capacity: usize,
    /// 低开销模式：视频队列超过该长度后开始跳帧
    pub low_overhead_queue_threshold: usize,
    /// 低开销模式：距上一次接受视频帧超过该间隔才恢复（毫秒）
    pub low_overhead_idle_ms: u64,
    /// 关闭时等待生产线程退出的上限（毫秒）
    pub join_timeout_ms: u64,
    /// 网络连接/读写超时（微秒，交给 FFmpeg）
    pub network_timeout_us: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            video_queue_capacity: 48,
            audio_queue_capacity: 120,
            low_overhead_queue_threshold: 2,
            low_overhead_idle_ms: 100,
            join_timeout_ms: 1000,
            network_timeout_us: 8_000_000,
        }
    }
}

/// 音画同步循环配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// pts 间隔无效或队列为空时的兜底休眠（毫秒）
    pub fallback_interval_ms: u64,
    /// 暂停时同步线程的轮询间隔（毫秒）
    pub paused_poll_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fallback_interval_ms: 20,
            paused_poll_ms: 10,
        }
    }
}

/// 弹幕调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionConfig {
    /// 滚动弹幕轨道数
    pub scroll_lanes: usize,
    /// 顶部/底部固定弹幕共用的轨道数
    pub fixed_lanes: usize,
    /// 滚动弹幕从右边进入到完全离开左边的时长（秒）
    pub scroll_duration: f32,
    /// 固定弹幕的显示时长（秒）
    pub fixed_duration: f32,
    /// 每个 tick 最多生成的弹幕数
    pub max_spawns_per_tick: usize,
    /// 同时存在的弹幕上限
    pub max_active: usize,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            scroll_lanes: 12,
            fixed_lanes: 6,
            scroll_duration: 8.0,
            fixed_duration: 4.0,
            max_spawns_per_tick: 8,
            max_active: 120,
        }
    }
}

/// 播放器整体配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub pipeline: PipelineConfig,
    pub sync: SyncConfig,
    pub caption: CaptionConfig,
}

impl PlayerConfig {
    /// 从 JSON 文件读取配置，缺省字段使用默认值
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_json_str(&content)?;
        info!("📄 已加载配置: {}", path.display());
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = PlayerConfig::from_json_str(
            r#"{ "pipeline": { "video_queue_capacity": 8 }, "caption": { "scroll_lanes": 3 } }"#,
        )
        .unwrap();
        assert_eq!(config.pipeline.video_queue_capacity, 8);
        assert_eq!(config.pipeline.low_overhead_idle_ms, 100);
        assert_eq!(config.caption.scroll_lanes, 3);
        assert_eq!(config.sync.fallback_interval_ms, 20);
    }

    #[test]
    fn test_invalid_config_is_error() {
        assert!(PlayerConfig::from_json_str("{ not json").is_err());
    }
}
