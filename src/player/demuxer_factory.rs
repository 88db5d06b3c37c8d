use crate::core::{PipelineConfig, SourceDescriptor};
use crate::player::pipeline::DecoderPipeline;
use crossbeam_channel::Sender;
use log::{error, info};
use std::thread;

/// 管线创建结果
pub enum PipelineCreationResult {
    /// 创建成功
    Success {
        pipeline: DecoderPipeline,
        url: String,
    },
    /// 创建失败
    Failed { url: String, error: String },
}

/// 管线工厂 - 在子线程中打开媒体源，避免网络连接阻塞调用线程
///
/// 使用方法：
/// ```ignore
/// let (tx, rx) = crossbeam_channel::unbounded();
/// PipelineFactory::open_async(source, config.pipeline.clone(), tx);
///
/// // 在渲染循环中接收结果
/// if let Ok(result) = rx.try_recv() {
///     match result {
///         PipelineCreationResult::Success { pipeline, .. } => {
///             manager.attach_pipeline(pipeline)?;
///         }
///         PipelineCreationResult::Failed { error, .. } => {
///             error!("创建失败: {}", error);
///         }
///     }
/// }
/// ```
pub struct PipelineFactory;

impl PipelineFactory {
    /// 异步打开媒体源
    pub fn open_async(
        source: SourceDescriptor,
        config: PipelineConfig,
        result_tx: Sender<PipelineCreationResult>,
    ) {
        thread::spawn(move || {
            let url = source.url.clone();
            if source.is_network_stream() {
                info!("🌐 在子线程中打开网络流: {}", url);
            } else {
                info!("📁 在子线程中打开本地文件: {}", url);
            }

            let result = match DecoderPipeline::open(&source, config) {
                Ok(pipeline) => PipelineCreationResult::Success { pipeline, url },
                Err(e) => PipelineCreationResult::Failed {
                    url,
                    error: e.to_string(),
                },
            };

            if let Err(e) = result_tx.send(result) {
                // 接收端已经不在了，管线随结果一起被 drop 并关闭
                error!("❌ 发送管线创建结果失败: {}", e);
            } else {
                info!("✅ 管线创建结果已发送");
            }
        });
    }
}
