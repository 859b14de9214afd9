use std::cmp::Reverse;
use std::collections::BinaryHeap;

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::game::judgment::JudgeGrade;

bitflags! {
    /// Per-lane flash content. The judgment categories are mutually
    /// exclusive: writing one clears the others first.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct LaneEffects: u32 {
        const PERFECT = 1;
        const GREAT = 1 << 1;
        const GOOD = 1 << 2;
        const BAD = 1 << 3;
        const MISS = 1 << 4;
        const HOLD_RELEASED = 1 << 5;
    }
}

impl LaneEffects {
    pub const JUDGMENT: LaneEffects = LaneEffects::PERFECT
        .union(LaneEffects::GREAT)
        .union(LaneEffects::GOOD)
        .union(LaneEffects::BAD)
        .union(LaneEffects::MISS)
        .union(LaneEffects::HOLD_RELEASED);

    #[inline(always)]
    pub const fn from_grade(grade: JudgeGrade) -> LaneEffects {
        match grade {
            JudgeGrade::Perfect => LaneEffects::PERFECT,
            JudgeGrade::Great => LaneEffects::GREAT,
            JudgeGrade::Good => LaneEffects::GOOD,
            JudgeGrade::Bad => LaneEffects::BAD,
            JudgeGrade::Miss => LaneEffects::MISS,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LaneEffect {
    pub content: LaneEffects,
    pub end_ms: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CenterEffectKind {
    Combo,
    Score,
}

/// A center-screen popup. Ordered by `end_ms` first so the expiry heap pops
/// soonest-expiring entries from the front.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CenterEffect {
    pub end_ms: u32,
    pub kind: CenterEffectKind,
    pub value: u32,
}

/// Time-scoped effect bookkeeping: one flash slot per lane plus a min-heap
/// of pending center popups. Both are purged lazily against the wall clock,
/// on the render cadence rather than the fragment tick.
#[derive(Clone, Debug, Default)]
pub struct EffectTracker {
    lanes: SmallVec<[LaneEffect; 8]>,
    center: BinaryHeap<Reverse<CenterEffect>>,
}

impl EffectTracker {
    pub fn new(lane_count: usize) -> Self {
        EffectTracker {
            lanes: SmallVec::from_elem(LaneEffect::default(), lane_count),
            center: BinaryHeap::new(),
        }
    }

    /// Replaces the lane's judgment content and refreshes its expiry.
    pub fn set_lane(&mut self, lane: usize, content: LaneEffects, end_ms: u32) {
        let effect = &mut self.lanes[lane];
        effect.content.remove(LaneEffects::JUDGMENT);
        effect.content.insert(content);
        effect.end_ms = end_ms;
    }

    #[inline(always)]
    pub fn lane(&self, lane: usize) -> LaneEffect {
        self.lanes[lane]
    }

    pub fn push_center(&mut self, effect: CenterEffect) {
        self.center.push(Reverse(effect));
    }

    /// Soonest-expiring pending popup, if any.
    pub fn center_front(&self) -> Option<CenterEffect> {
        self.center.peek().map(|Reverse(e)| *e)
    }

    /// Pending popups in no particular order; the front is only meaningful
    /// through `center_front`.
    pub fn center_pending(&self) -> impl Iterator<Item = CenterEffect> + '_ {
        self.center.iter().map(|Reverse(e)| *e)
    }

    #[inline(always)]
    pub fn center_len(&self) -> usize {
        self.center.len()
    }

    /// Drops every effect whose display window has elapsed. Idempotent for
    /// a fixed `now_ms`.
    pub fn purge_expired(&mut self, now_ms: u32) {
        for effect in &mut self.lanes {
            if effect.end_ms <= now_ms {
                *effect = LaneEffect::default();
            }
        }
        while let Some(Reverse(front)) = self.center.peek() {
            if front.end_ms > now_ms {
                break;
            }
            self.center.pop();
        }
    }
}
