// 弹幕模块：弹幕轨、时间轴游标、轨道分配和调度

pub mod event;
pub mod lanes;
pub mod scheduler;
pub mod timeline;

pub use event::{CaptionEvent, CaptionKind, CaptionTrack};
pub use lanes::LaneSet;
pub use scheduler::{CaptionEntity, CaptionScheduler, CaptionStats, SpawnOutcome, TextMeasure};
pub use timeline::TimelineCursor;
