use crate::core::{DecodedFrame, MediaInfo, Result};

/// 解码会话抽象接口
///
/// 一个会话对应一个打开的媒体地址：合流（音视频都有）或者拆分流里的单路。
/// 生产线程通过 `grab` 逐帧拉取，seek/close 期间由管线持锁保证不会并发 grab。
pub trait DecodeSession: Send {
    /// 拉取下一帧
    ///
    /// 返回：
    /// - Ok(Some(frame)): 成功解码一帧
    /// - Ok(None): 到达流末尾
    /// - Err(e): 读取或解码错误
    ///
    /// `convert_video` 为 false 时视频帧跳过像素转换（低开销模式）。
    fn grab(&mut self, convert_video: bool) -> Result<Option<DecodedFrame>>;

    /// Seek 到指定位置（微秒）
    fn seek(&mut self, timestamp_us: i64) -> Result<()>;

    /// 获取媒体信息
    fn media_info(&self) -> &MediaInfo;

    /// 停止会话，释放底层资源
    fn stop(&mut self) {}

    /// 是否支持 seek
    fn is_seekable(&self) -> bool {
        !self.media_info().is_live()
    }

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}
