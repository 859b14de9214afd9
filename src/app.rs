use std::path::Path;

use log::info;

use beatline::config;
use beatline::game::mods::{ModRegistry, life};
use beatline::game::note::Timeline;
use beatline::game::parsing::chart;
use beatline::game::play::Playfield;

/// Headless autoplay session: loads a chart, drives the simulation one
/// fragment per tick on a virtual clock, and synthesizes perfectly timed
/// input for whatever reaches the judgment line. A real frontend replaces
/// the synthesized input with hardware events and sleeps the tick interval;
/// the call pattern is the same.
pub fn run(chart_path: &Path) -> Result<(), String> {
    let cfg = config::get();
    let chart = chart::load(chart_path)?;
    let ms_per_fragment = chart.ms_per_fragment();

    let last_fragment = chart
        .notes
        .iter()
        .map(|n| n.start_fragment + n.hold.max(1) as usize)
        .max()
        .unwrap_or(0);
    let total_ticks = last_fragment + cfg.visible_fragments + 2;

    let mut field = Playfield::new(
        cfg.lanes,
        cfg.visible_fragments,
        ms_per_fragment,
        Timeline::from_sorted(chart.notes.clone()),
    );

    let mut mods = ModRegistry::new();
    life::register_presets(&mut mods);
    if !cfg.active_mod.is_empty() && mods.activate(&cfg.active_mod) {
        info!("active mod: {}", cfg.active_mod);
    }

    info!(
        "autoplay: {} lanes, {} visible fragments, {ms_per_fragment}ms per fragment, {total_ticks} ticks",
        cfg.lanes, cfg.visible_fragments
    );

    for _ in 0..total_ticks {
        let fragment_start = field.now_fragment() as u32 * ms_per_fragment;

        for lane in 0..field.lane_count() {
            let cell = field.lane(lane).judgment();
            if cell < 0 {
                field.on_press(lane, fragment_start + ms_per_fragment / 10);
                field.on_release(lane, fragment_start + ms_per_fragment / 5);
            } else if cell > 0 && !field.lane_pressed(lane) {
                field.on_press(lane, fragment_start);
            } else if cell == 0 && field.lane_pressed(lane) {
                field.on_release(lane, fragment_start);
            }
        }

        // Effects expire on the display cadence, independent of the tick.
        field.purge_expired(fragment_start + ms_per_fragment / 2);
        field.purge_expired(fragment_start + ms_per_fragment);

        field.tick(&mods);
    }

    let score = field.score();
    info!(
        "session over: score {} (perfect {}, great {}, good {}, bad {}, miss {}), max combo {}, held {}ms",
        score.score,
        score.perfect,
        score.great,
        score.good,
        score.bad,
        score.miss,
        score.max_combo,
        score.held_ms
    );
    println!(
        "score {}  perfect {}  great {}  good {}  bad {}  miss {}  max combo {}",
        score.score, score.perfect, score.great, score.good, score.bad, score.miss, score.max_combo
    );
    Ok(())
}
