use std::fmt::Display;

/// frame slot 的标签，用于日志和命令缓冲命名
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RgFrameLabel {
    A,
    B,
    C,
    D,
}

impl RgFrameLabel {
    const ALL: [Self; 4] = [Self::A, Self::B, Self::C, Self::D];

    #[inline]
    pub fn from_usize(idx: usize) -> Self {
        Self::ALL[idx % Self::ALL.len()]
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl Display for RgFrameLabel {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
            Self::D => write!(f, "D"),
        }
    }
}

pub struct RgFrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
    fif_count: usize,
}
// new & init
impl RgFrameCounter {
    pub fn new(init_frame_id: u64, fif_count: usize) -> Self {
        Self {
            frame_id: init_frame_id,
            fif_count: fif_count.max(1),
        }
    }
}
// update
impl RgFrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}
// getters
impl RgFrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[inline]
    pub fn fif_count(&self) -> usize {
        self.fif_count
    }

    /// 某一帧使用的 slot
    #[inline]
    pub fn slot_of(&self, frame_id: u64) -> usize {
        (frame_id % self.fif_count as u64) as usize
    }

    #[inline]
    pub fn slot_index(&self) -> usize {
        self.slot_of(self.frame_id)
    }

    #[inline]
    pub fn frame_label(&self) -> RgFrameLabel {
        RgFrameLabel::from_usize(self.slot_index())
    }

    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_cycle() {
        let mut counter = RgFrameCounter::new(0, 2);
        let mut names = Vec::new();
        for _ in 0..4 {
            names.push((counter.slot_index(), counter.frame_name()));
            counter.next_frame();
        }
        assert_eq!(
            names,
            vec![
                (0, "[F0A]".to_string()),
                (1, "[F1B]".to_string()),
                (0, "[F2A]".to_string()),
                (1, "[F3B]".to_string()),
            ]
        );
    }

    #[test]
    fn test_zero_fif_is_clamped() {
        let counter = RgFrameCounter::new(7, 0);
        assert_eq!(counter.fif_count(), 1);
        assert_eq!(counter.slot_index(), 0);
    }
}
