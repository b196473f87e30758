/// A hardware/software acceptance filter.
///
/// A frame matches iff `(frame.id & mask) == (id & mask)` and, when
/// `extended` is set, the frame's `extended` flag equals it. An empty filter
/// list always accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CANFilter {
    pub id: u32,
    pub mask: u32,
    pub extended: Option<bool>,
}

impl CANFilter {
    pub fn new(id: u32, mask: u32) -> Self {
        Self {
            id,
            mask,
            extended: None,
        }
    }

    pub fn with_extended(mut self, extended: bool) -> Self {
        self.extended = Some(extended);
        self
    }

    fn matches_one(&self, frame: &j1939rt_proto::CANFrame) -> bool {
        if let Some(extended) = self.extended {
            if frame.extended() != extended {
                return false;
            }
        }
        (frame.id() & self.mask) == (self.id & self.mask)
    }
}

/// Apply a filter list to a frame. An empty list accepts everything.
pub fn accepts(filters: &[CANFilter], frame: &j1939rt_proto::CANFrame) -> bool {
    filters.is_empty() || filters.iter().any(|f| f.matches_one(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use j1939rt_proto::CANFrame;

    #[test]
    fn empty_filter_list_accepts_all() {
        let frame = CANFrame::new(0x123, [1, 2, 3], false).unwrap();
        assert!(accepts(&[], &frame));
    }

    #[test]
    fn mask_determines_match() {
        let frame = CANFrame::new(0x123, [], false).unwrap();
        let matching = CANFilter::new(0x123, 0xFFF);
        let non_matching = CANFilter::new(0x124, 0xFFF);
        assert!(accepts(&[matching], &frame));
        assert!(!accepts(&[non_matching], &frame));
    }

    #[test]
    fn extended_flag_must_match_when_set() {
        let frame = CANFrame::new(0x123, [], false).unwrap();
        let filter = CANFilter::new(0x123, 0xFFF).with_extended(true);
        assert!(!accepts(&[filter], &frame));
    }
}
