use log::debug;
use smallvec::SmallVec;

use crate::game::effects::{CenterEffect, CenterEffectKind, EffectTracker, LaneEffects};
use crate::game::highway::{CELL_EMPTY, LaneBuffer, cell_is_hold, cell_is_tap};
use crate::game::judgment::{self, JudgeGrade};
use crate::game::mods::ModRegistry;
use crate::game::note::Timeline;

// Inline capacity for per-lane state; larger lane counts spill to the heap.
const TYPICAL_LANES: usize = 8;

/// Session scoring totals. Everything is monotone non-decreasing except
/// `combo`; `max_combo >= combo` holds after every operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScoreState {
    pub score: u32,
    pub perfect: u32,
    pub great: u32,
    pub good: u32,
    pub bad: u32,
    pub miss: u32,
    pub combo: u32,
    pub max_combo: u32,
    pub held_ms: u32,
}

#[derive(Clone, Copy, Debug, Default)]
struct LaneInput {
    pressed: bool,
    hold_started_ms: u32,
    // Whether the hold currently crossing the judgment line has been
    // engaged at least once; consumed when its final segment leaves.
    hold_engaged: bool,
}

/// The simulation core: per-lane highway buffers, input state, scoring and
/// effect bookkeeping, advanced one fragment per `tick`. Single-threaded;
/// the driver calls `tick`, `on_press` and `on_release` sequentially.
pub struct Playfield {
    timeline: Timeline,
    highway: SmallVec<[LaneBuffer; TYPICAL_LANES]>,
    input: SmallVec<[LaneInput; TYPICAL_LANES]>,
    effects: EffectTracker,
    score: ScoreState,
    now_fragment: usize,
    ms_per_fragment: u32,
}

impl Playfield {
    /// `timeline` must already be sorted ascending by start fragment; the
    /// core never re-sorts.
    pub fn new(
        lanes: usize,
        visible_fragments: usize,
        ms_per_fragment: u32,
        timeline: Timeline,
    ) -> Self {
        assert!(lanes > 0, "a playfield needs at least one lane");
        assert!(
            visible_fragments >= 2,
            "the highway needs a top slot and a judgment slot"
        );
        assert!(ms_per_fragment > 0, "fragment duration must be positive");

        Playfield {
            timeline,
            highway: (0..lanes).map(|_| LaneBuffer::new(visible_fragments)).collect(),
            input: SmallVec::from_elem(LaneInput::default(), lanes),
            effects: EffectTracker::new(lanes),
            score: ScoreState::default(),
            now_fragment: 0,
            ms_per_fragment,
        }
    }

    // ------------------------- Query surface -------------------------
    // Read every frame by the rendering/audio collaborators.

    #[inline(always)]
    pub fn lane_count(&self) -> usize {
        self.highway.len()
    }

    #[inline(always)]
    pub fn visible_fragments(&self) -> usize {
        self.highway[0].len()
    }

    #[inline(always)]
    pub fn ms_per_fragment(&self) -> u32 {
        self.ms_per_fragment
    }

    #[inline(always)]
    pub fn now_fragment(&self) -> usize {
        self.now_fragment
    }

    #[inline(always)]
    pub fn lane(&self, lane: usize) -> &LaneBuffer {
        &self.highway[lane]
    }

    /// Mutable lane access for highway mods. Hooks must keep every cell in
    /// the `{empty, tap, positive hold count}` domain.
    #[inline(always)]
    pub fn lane_mut(&mut self, lane: usize) -> &mut LaneBuffer {
        &mut self.highway[lane]
    }

    #[inline(always)]
    pub fn lane_pressed(&self, lane: usize) -> bool {
        self.input[lane].pressed
    }

    #[inline(always)]
    pub fn lane_hold_started_ms(&self, lane: usize) -> u32 {
        self.input[lane].hold_started_ms
    }

    #[inline(always)]
    pub fn score(&self) -> &ScoreState {
        &self.score
    }

    #[inline(always)]
    pub fn effects(&self) -> &EffectTracker {
        &self.effects
    }

    #[inline(always)]
    pub fn notes_remaining(&self) -> usize {
        self.timeline.remaining()
    }

    // Judgment flashes stay visible for one full highway window; center
    // popups for three.
    #[inline(always)]
    fn flash_window_ms(&self) -> u32 {
        self.ms_per_fragment * self.visible_fragments() as u32
    }

    #[inline(always)]
    fn popup_window_ms(&self) -> u32 {
        self.flash_window_ms() * 3
    }

    // ------------------------- Tick algorithm -------------------------

    /// Advances the simulation by exactly one fragment. The driver calls
    /// this once per `ms_per_fragment` and never twice for the same
    /// fragment.
    pub fn tick(&mut self, mods: &ModRegistry) {
        let now_ms = (self.now_fragment as u32 + 1) * self.ms_per_fragment;

        // 1. Judgment-line pass: expire taps, consume sustain segments.
        for lane in 0..self.highway.len() {
            let cell = self.highway[lane].judgment();
            if cell_is_tap(cell) {
                self.record_miss(lane, now_ms);
                self.highway[lane].set_judgment(CELL_EMPTY);
            } else if cell_is_hold(cell) {
                if self.input[lane].pressed {
                    self.accrue_hold(lane, now_ms);
                    self.input[lane].hold_started_ms = now_ms;
                    self.input[lane].hold_engaged = true;
                } else if cell == 1 && !self.input[lane].hold_engaged {
                    // The hold passed the judgment line without ever being
                    // engaged: one miss for the whole note.
                    self.record_miss(lane, now_ms);
                }
                if cell == 1 {
                    self.input[lane].hold_engaged = false;
                }
                self.highway[lane].set_judgment(CELL_EMPTY);
            }
        }

        // 2. Pre-rotation hook.
        if let Some(entry) = mods.active_entry() {
            if let Some(hook) = entry.pre.as_deref() {
                hook.apply(self);
                #[cfg(debug_assertions)]
                self.check_cell_domain("pre-rotation");
            }
        }

        // 3 + 4. Rotate every lane and refill the freed top slot from the
        // previous top, so multi-fragment holds flow toward the judgment
        // line one fragment at a time.
        for lane in &mut self.highway {
            lane.rotate();
            let below = lane.get(1);
            lane.set(0, if below > 1 { below - 1 } else { CELL_EMPTY });
        }

        // 5. Merge newly due notes into the top slots.
        while let Some(note) = self.timeline.next_due(self.now_fragment) {
            if note.lane < self.highway.len() {
                self.highway[note.lane].set(0, note.cell_value());
            } else {
                debug!(
                    "skipping note at fragment {} on out-of-range lane {}",
                    note.start_fragment, note.lane
                );
            }
        }

        // 6. Advance the fragment counter.
        self.now_fragment += 1;

        // 7. Post-rotation hook.
        if let Some(entry) = mods.active_entry() {
            if let Some(hook) = entry.post.as_deref() {
                hook.apply(self);
                #[cfg(debug_assertions)]
                self.check_cell_domain("post-rotation");
            }
        }
    }

    // ------------------------- Input events -------------------------

    /// Press on `lane` at `now_ms` (milliseconds since session start).
    /// Out-of-range lanes are ignored; no note can ever occupy them.
    pub fn on_press(&mut self, lane: usize, now_ms: u32) {
        if lane >= self.highway.len() {
            return;
        }
        self.input[lane].pressed = true;

        let cell = self.highway[lane].judgment();
        if cell_is_tap(cell) {
            self.score_tap(lane, now_ms);
            self.highway[lane].set_judgment(CELL_EMPTY);
        } else if cell_is_hold(cell) {
            // The press itself does not score; sustain accrues at tick
            // boundaries and on release.
            self.input[lane].hold_started_ms = now_ms;
            self.input[lane].hold_engaged = true;
        }
    }

    /// Release on `lane`. An active hold at the judgment line ends
    /// immediately and its pending sustain is scored.
    pub fn on_release(&mut self, lane: usize, now_ms: u32) {
        if lane >= self.highway.len() {
            return;
        }
        self.input[lane].pressed = false;

        let cell = self.highway[lane].judgment();
        if cell_is_hold(cell) {
            self.accrue_hold(lane, now_ms);
            self.highway[lane].set_judgment(CELL_EMPTY);
            if cell == 1 {
                self.input[lane].hold_engaged = false;
            }
        }
    }

    /// Drops effects whose display window has elapsed. Driven by the
    /// render/update loop, independent of the fragment tick.
    pub fn purge_expired(&mut self, now_ms: u32) {
        self.effects.purge_expired(now_ms);
    }

    // ------------------------- Scoring -------------------------

    fn score_tap(&mut self, lane: usize, now_ms: u32) {
        let fragment_start = self.now_fragment as u32 * self.ms_per_fragment;
        let offset = (i64::from(now_ms) - i64::from(fragment_start)) as f64
            / f64::from(self.ms_per_fragment);
        let Some(grade) = judgment::classify_press_offset(offset) else {
            debug!("press on lane {lane} outside every window (offset {offset:.2})");
            return;
        };
        debug!("lane {lane} tap judged {grade:?} at offset {offset:.2}");

        let thousands_before = self.score.score / 1000;
        self.score.score += grade.points();
        match grade {
            JudgeGrade::Perfect => self.score.perfect += 1,
            JudgeGrade::Great => self.score.great += 1,
            JudgeGrade::Good => self.score.good += 1,
            JudgeGrade::Bad => self.score.bad += 1,
            JudgeGrade::Miss => unreachable!("a press never classifies as Miss"),
        }
        if grade.breaks_combo() {
            self.score.combo = 0;
        } else {
            self.bump_combo(now_ms);
        }
        self.effects
            .set_lane(lane, LaneEffects::from_grade(grade), now_ms + self.flash_window_ms());
        self.push_score_popup_if_crossed(thousands_before, now_ms);
    }

    /// Scores the sustain interval since the hold was last pressed or last
    /// accrued, clamped to the start of the current fragment: the segment
    /// at the judgment line has only been there since then.
    fn accrue_hold(&mut self, lane: usize, now_ms: u32) {
        let fragment_start = self.now_fragment as u32 * self.ms_per_fragment;
        let from = self.input[lane].hold_started_ms.max(fragment_start);
        let elapsed = now_ms.saturating_sub(from);

        self.score.held_ms += elapsed;
        let thousands_before = self.score.score / 1000;
        self.score.score += judgment::hold_points(elapsed, self.ms_per_fragment);
        self.effects
            .set_lane(lane, LaneEffects::HOLD_RELEASED, now_ms + self.flash_window_ms());
        self.push_score_popup_if_crossed(thousands_before, now_ms);
    }

    fn bump_combo(&mut self, now_ms: u32) {
        self.score.combo += 1;
        self.score.max_combo = self.score.max_combo.max(self.score.combo);
        if self.score.combo > 1 {
            self.effects.push_center(CenterEffect {
                end_ms: now_ms + self.popup_window_ms(),
                kind: CenterEffectKind::Combo,
                value: self.score.combo,
            });
        }
    }

    fn record_miss(&mut self, lane: usize, now_ms: u32) {
        debug!("miss on lane {lane} at {now_ms}ms");
        self.score.miss += 1;
        self.score.combo = 0;
        self.effects
            .set_lane(lane, LaneEffects::MISS, now_ms + self.flash_window_ms());
    }

    /// A score popup appears when the integer-thousands digit advances,
    /// not on every point gain.
    fn push_score_popup_if_crossed(&mut self, thousands_before: u32, now_ms: u32) {
        if self.score.score / 1000 > thousands_before {
            self.effects.push_center(CenterEffect {
                end_ms: now_ms + self.popup_window_ms(),
                kind: CenterEffectKind::Score,
                value: self.score.score,
            });
        }
    }

    #[cfg(debug_assertions)]
    fn check_cell_domain(&self, stage: &str) {
        use crate::game::highway::cell_in_domain;
        for (lane, buffer) in self.highway.iter().enumerate() {
            for slot in 0..buffer.len() {
                let cell = buffer.get(slot);
                debug_assert!(
                    cell_in_domain(cell),
                    "{stage} hook wrote out-of-domain cell {cell} at lane {lane} slot {slot}"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Playfield, ScoreState};
    use crate::game::effects::{CenterEffectKind, LaneEffects};
    use crate::game::highway::CELL_EMPTY;
    use crate::game::mods::ModRegistry;
    use crate::game::note::{Note, Timeline};

    const MPF: u32 = 100;

    fn playfield(lanes: usize, window: usize, notes: Vec<Note>) -> Playfield {
        Playfield::new(lanes, window, MPF, Timeline::from_sorted(notes))
    }

    fn tick_n(field: &mut Playfield, n: usize) {
        let mods = ModRegistry::new();
        for _ in 0..n {
            field.tick(&mods);
        }
    }

    fn assert_combo_invariant(score: &ScoreState) {
        assert!(
            score.max_combo >= score.combo,
            "max_combo {} < combo {}",
            score.max_combo,
            score.combo
        );
    }

    #[test]
    fn tap_reaches_judgment_line_after_window_ticks() {
        let mut field = playfield(1, 4, vec![Note::tap(0, 0)]);
        tick_n(&mut field, 3);
        assert_eq!(field.lane(0).judgment(), CELL_EMPTY);
        tick_n(&mut field, 1);
        assert_eq!(field.lane(0).judgment(), -1);
        assert_eq!(field.now_fragment(), 4);
    }

    #[test]
    fn perfect_press_scenario() {
        let mut field = playfield(1, 4, vec![Note::tap(0, 0)]);
        tick_n(&mut field, 4);

        // Fragment 4 started at 400ms; a press at 410ms is offset 0.10.
        field.on_press(0, 410);
        let score = field.score();
        assert_eq!(score.score, 1000);
        assert_eq!(score.perfect, 1);
        assert_eq!(score.combo, 1);
        assert_eq!(field.lane(0).judgment(), CELL_EMPTY, "hit tap is consumed");
        assert_eq!(field.effects().lane(0).content, LaneEffects::PERFECT);
        assert_combo_invariant(score);
    }

    #[test]
    fn unpressed_tap_misses_once() {
        let mut field = playfield(1, 4, vec![Note::tap(0, 0)]);
        tick_n(&mut field, 5);

        let score = field.score();
        assert_eq!(score.miss, 1);
        assert_eq!(score.combo, 0);
        assert_eq!(field.effects().lane(0).content, LaneEffects::MISS);

        // Further ticks do not miss again.
        tick_n(&mut field, 5);
        assert_eq!(field.score().miss, 1);
    }

    #[test]
    fn bad_press_scores_and_resets_combo() {
        let notes = vec![Note::tap(0, 0), Note::tap(1, 0)];
        let mut field = playfield(1, 4, notes);
        tick_n(&mut field, 4);
        field.on_press(0, 410); // Perfect, combo 1
        field.on_release(0, 450);
        tick_n(&mut field, 1);
        field.on_press(0, 570); // fragment 5 started at 500: offset 0.70, Bad

        let score = field.score();
        assert_eq!(score.bad, 1);
        assert_eq!(score.score, 1100);
        assert_eq!(score.combo, 0);
        assert_eq!(score.max_combo, 1);
        assert_eq!(field.effects().lane(0).content, LaneEffects::BAD);
        assert_combo_invariant(score);
    }

    #[test]
    fn press_at_exact_fragment_boundary_is_bad() {
        let mut field = playfield(1, 4, vec![Note::tap(0, 0)]);
        tick_n(&mut field, 4);
        field.on_press(0, 500); // offset exactly 1.00
        assert_eq!(field.score().bad, 1);
        assert_eq!(field.score().miss, 0);
    }

    #[test]
    fn held_hold_accrues_strictly_increasing_score_without_miss() {
        let mut field = playfield(1, 4, vec![Note::hold(0, 0, 3)]);
        tick_n(&mut field, 4);
        assert_eq!(field.lane(0).judgment(), 3);

        field.on_press(0, 400);
        let mut last_score = field.score().score;
        let mut last_held = field.score().held_ms;
        for expected in [2, 1, 0] {
            tick_n(&mut field, 1);
            let score = field.score();
            assert!(
                score.score > last_score,
                "sustain score must grow at every tick boundary"
            );
            assert!(score.held_ms > last_held, "held time must grow while pressed");
            last_score = score.score;
            last_held = score.held_ms;
            assert_eq!(field.lane(0).judgment(), expected);
        }
        assert_eq!(field.score().miss, 0);
        assert_eq!(field.score().held_ms, 300);
        assert_eq!(field.score().score, 1200);
    }

    #[test]
    fn unpressed_hold_misses_exactly_once_when_it_vacates() {
        let mut field = playfield(1, 4, vec![Note::hold(0, 0, 3)]);
        // 4 ticks bring the head to the line; 3 more consume the sustain
        // trail (3, 2, then the final 1).
        tick_n(&mut field, 6);
        assert_eq!(field.score().miss, 0, "no miss until the hold vacates");
        tick_n(&mut field, 1);
        assert_eq!(field.score().miss, 1);
        assert_eq!(field.effects().lane(0).content, LaneEffects::MISS);
        tick_n(&mut field, 4);
        assert_eq!(field.score().miss, 1, "one miss per hold, not per fragment");
    }

    #[test]
    fn early_release_ends_the_hold_without_a_later_miss() {
        let mut field = playfield(1, 4, vec![Note::hold(0, 0, 3)]);
        tick_n(&mut field, 4);
        field.on_press(0, 400);
        tick_n(&mut field, 1); // consumes segment 3, accrues 100ms

        // Segment 2 is at the line during fragment 5 (500..600ms).
        field.on_release(0, 550);
        let after_release = *field.score();
        assert_eq!(after_release.held_ms, 150);
        assert_eq!(field.lane(0).judgment(), CELL_EMPTY);
        assert_eq!(field.effects().lane(0).content, LaneEffects::HOLD_RELEASED);

        // The remaining trail drains without punishing the early release.
        tick_n(&mut field, 3);
        assert_eq!(field.score().miss, 0);
        assert_eq!(field.score().held_ms, after_release.held_ms);
    }

    #[test]
    fn repressing_a_hold_resumes_sustain_scoring() {
        let mut field = playfield(1, 4, vec![Note::hold(0, 0, 3)]);
        tick_n(&mut field, 4);
        field.on_press(0, 400);
        tick_n(&mut field, 1);
        field.on_release(0, 500);
        tick_n(&mut field, 1); // segment 1 now at the line (fragment 6)

        field.on_press(0, 620);
        tick_n(&mut field, 1); // accrues 700 - 620 = 80ms
        assert_eq!(field.score().held_ms, 100 + 80);
        assert_eq!(field.score().miss, 0);
    }

    #[test]
    fn holding_a_lane_before_the_note_arrives_accrues_one_fragment_per_tick() {
        let mut field = playfield(1, 4, vec![Note::hold(0, 0, 1)]);
        // Pressed long before the hold reaches the line; the stale press
        // timestamp must not be credited as sustain.
        field.on_press(0, 50);
        tick_n(&mut field, 5);
        assert_eq!(field.score().held_ms, 100, "credit starts at the fragment boundary");
        assert_eq!(field.score().miss, 0);
    }

    #[test]
    fn score_popup_appears_on_thousands_crossings_only() {
        let notes = vec![Note::tap(0, 0), Note::tap(1, 0)];
        let mut field = playfield(1, 4, notes);
        tick_n(&mut field, 4);
        field.on_press(0, 450); // Good: 300 points, no crossing
        field.on_release(0, 460);
        assert_eq!(field.effects().center_len(), 0);

        tick_n(&mut field, 1);
        field.on_press(0, 510); // Perfect: 1300 total, crosses 1000
        let popups: Vec<_> = field.effects().center_pending().collect();
        let scores: Vec<_> = popups
            .iter()
            .filter(|e| e.kind == CenterEffectKind::Score)
            .collect();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].value, 1300);
    }

    #[test]
    fn combo_popup_starts_at_two() {
        let notes = vec![Note::tap(0, 0), Note::tap(1, 0)];
        let mut field = playfield(1, 4, notes);
        tick_n(&mut field, 4);
        field.on_press(0, 410);
        field.on_release(0, 420);
        let combos = field
            .effects()
            .center_pending()
            .filter(|e| e.kind == CenterEffectKind::Combo)
            .count();
        assert_eq!(combos, 0, "combo 1 shows no popup");

        tick_n(&mut field, 1);
        field.on_press(0, 510);
        let combo: Vec<_> = field
            .effects()
            .center_pending()
            .filter(|e| e.kind == CenterEffectKind::Combo)
            .collect();
        assert_eq!(combo.len(), 1);
        assert_eq!(combo[0].value, 2);
    }

    #[test]
    fn out_of_range_input_is_ignored() {
        let mut field = playfield(1, 4, vec![Note::tap(0, 0)]);
        tick_n(&mut field, 4);
        field.on_press(7, 410);
        field.on_release(7, 420);
        assert_eq!(*field.score(), ScoreState::default());
        assert_eq!(field.lane(0).judgment(), -1, "the real lane is untouched");
    }

    #[test]
    fn out_of_range_note_lane_is_skipped_at_load() {
        let mut field = playfield(2, 4, vec![Note::tap(0, 5), Note::tap(0, 1)]);
        tick_n(&mut field, 1);
        assert_eq!(field.lane(1).get(0), -1, "in-range note still loads");
        assert_eq!(field.lane(0).get(0), CELL_EMPTY);
        assert_eq!(field.notes_remaining(), 0, "cursor advances past bad lanes");
    }

    #[test]
    fn cells_stay_in_domain_through_a_full_session() {
        let notes = vec![
            Note::tap(0, 0),
            Note::hold(1, 1, 4),
            Note::tap(3, 2),
            Note::hold(3, 0, 2),
            Note::tap(6, 1),
        ];
        let mut field = playfield(3, 5, notes);
        let mods = ModRegistry::new();
        for tick in 0..20 {
            field.tick(&mods);
            if tick % 2 == 0 {
                field.on_press(tick % 3, tick as u32 * MPF);
            } else {
                field.on_release(tick % 3, tick as u32 * MPF);
            }
            for lane in 0..field.lane_count() {
                for cell in field.lane(lane).iter() {
                    assert!(cell >= -1, "cell {cell} out of domain");
                    assert!(cell <= 4, "cell {cell} beyond max hold length");
                }
            }
            assert_combo_invariant(field.score());
        }
    }

    #[test]
    fn miss_effect_expires_after_the_flash_window() {
        let mut field = playfield(1, 4, vec![Note::tap(0, 0)]);
        tick_n(&mut field, 5); // miss at 500ms, flash until 900ms

        field.purge_expired(899);
        assert_eq!(field.effects().lane(0).content, LaneEffects::MISS);
        field.purge_expired(900);
        assert_eq!(field.effects().lane(0).content, LaneEffects::empty());
    }
}
