/// 一组轨道，每条轨道记录最近一次放入的弹幕 id
#[derive(Debug, Clone)]
pub struct LaneSet {
    occupants: Vec<Option<u64>>,
}

impl LaneSet {
    pub fn new(count: usize) -> Self {
        Self {
            occupants: vec![None; count],
        }
    }

    pub fn len(&self) -> usize {
        self.occupants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupants.is_empty()
    }

    pub fn occupant(&self, lane: usize) -> Option<u64> {
        self.occupants.get(lane).copied().flatten()
    }

    /// 放入新弹幕，替换原来的占用者
    pub fn claim(&mut self, lane: usize, id: u64) {
        if let Some(slot) = self.occupants.get_mut(lane) {
            *slot = Some(id);
        }
    }

    /// 仅当 `id` 仍是该轨道的占用者时才释放
    pub fn release(&mut self, lane: usize, id: u64) -> bool {
        match self.occupants.get_mut(lane) {
            Some(slot) if *slot == Some(id) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.occupants.iter_mut().for_each(|slot| *slot = None);
    }

    /// 扫描顺序：自上而下，或自下而上（底部弹幕）
    pub fn scan_order(&self, bottom_up: bool) -> Vec<usize> {
        if bottom_up {
            (0..self.len()).rev().collect()
        } else {
            (0..self.len()).collect()
        }
    }

    /// 按扫描顺序返回第一条满足条件的轨道；空轨道总是满足
    pub fn find<F>(&self, bottom_up: bool, mut fits: F) -> Option<usize>
    where
        F: FnMut(u64) -> bool,
    {
        self.scan_order(bottom_up)
            .into_iter()
            .find(|&lane| self.occupant(lane).map_or(true, &mut fits))
    }
}

/// 滚动弹幕的几何状态（坐标按画面宽度归一化，右边界为 1.0）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollGeometry {
    /// 左边缘位置
    pub x: f32,
    pub width: f32,
    /// 每秒移动的距离
    pub speed: f32,
}

/// 新弹幕从右边界进入后，是否会与轨道上的弹幕重叠
///
/// 占用者尾部必须已经完全进入画面，并且在占用者离开左边界之前新弹幕追不上它。
pub fn scroll_lane_fits(occupant: &ScrollGeometry, new_speed: f32) -> bool {
    let tail = occupant.x + occupant.width;
    if tail > 1.0 {
        return false;
    }
    if tail <= 0.0 || new_speed <= occupant.speed {
        return true;
    }
    if occupant.speed <= 0.0 {
        return false;
    }
    let gap = 1.0 - tail;
    let time_to_exit = tail / occupant.speed;
    gap >= (new_speed - occupant.speed) * time_to_exit
}
