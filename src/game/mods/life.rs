use crate::game::highway::{CELL_EMPTY, CELL_TAP, cell_is_hold};
use crate::game::mods::{HighwayMod, ModRegistry};
use crate::game::play::Playfield;

/// Conway-style pass over the visible highway: tap cells are alive, empty
/// cells are dead, hold cells are never rewritten but may count as alive
/// neighbors. An alive cell whose 8-neighbor count differs from `survive`
/// dies; a dead cell whose count equals `revive` becomes a tap.
#[derive(Clone, Copy, Debug)]
pub struct GameOfLife {
    pub survive: u8,
    pub revive: u8,
    pub hold_alive: bool,
}

impl GameOfLife {
    #[inline(always)]
    fn counts_alive(&self, cell: i8) -> bool {
        cell == CELL_TAP || (self.hold_alive && cell_is_hold(cell))
    }
}

impl HighwayMod for GameOfLife {
    fn apply(&self, field: &mut Playfield) {
        let lanes = field.lane_count();
        let window = field.visible_fragments();

        // Snapshot the whole highway so every neighbor count reads the
        // pre-pass generation.
        let mut old = vec![CELL_EMPTY; lanes * window];
        for lane in 0..lanes {
            for slot in 0..window {
                old[lane * window + slot] = field.lane(lane).get(slot);
            }
        }

        for lane in 0..lanes {
            for slot in 0..window {
                let mut alive = 0u8;
                for dl in -1i32..=1 {
                    for ds in -1i32..=1 {
                        if dl == 0 && ds == 0 {
                            continue;
                        }
                        let nl = lane as i32 + dl;
                        let ns = slot as i32 + ds;
                        if nl < 0 || nl >= lanes as i32 || ns < 0 || ns >= window as i32 {
                            continue;
                        }
                        if self.counts_alive(old[nl as usize * window + ns as usize]) {
                            alive += 1;
                        }
                    }
                }

                let cell = field.lane(lane).get(slot);
                if cell == CELL_TAP {
                    if alive != self.survive {
                        field.lane_mut(lane).set(slot, CELL_EMPTY);
                    }
                } else if cell == CELL_EMPTY && alive == self.revive {
                    field.lane_mut(lane).set(slot, CELL_TAP);
                }
                // Hold cells stay unchanged.
            }
        }
    }
}

fn preset_name(survive: u8, revive: u8, hold_alive: bool, before: bool) -> String {
    format!(
        "Game of Life, Survive: {survive}, Revive: {revive}, Hold {}, {}",
        if hold_alive { "Alive" } else { "Dead" },
        if before { "Before" } else { "After" }
    )
}

/// Registers the full survive x revive x hold-alive matrix, each variant
/// once as a pre-rotation pass and once as a post-rotation pass.
pub fn register_presets(registry: &mut ModRegistry) {
    for survive in 0..8u8 {
        for revive in 0..8u8 {
            for hold_alive in [true, false] {
                let life = GameOfLife {
                    survive,
                    revive,
                    hold_alive,
                };
                registry.register(
                    preset_name(survive, revive, hold_alive, true),
                    Some(Box::new(life)),
                    None,
                );
                registry.register(
                    preset_name(survive, revive, hold_alive, false),
                    None,
                    Some(Box::new(life)),
                );
            }
        }
    }
}
