mod app;

use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install the logger first, then clamp the runtime level once the
    // config has been read.
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .try_init();
    log::set_max_level(log::LevelFilter::Warn);

    beatline::config::load();
    log::set_max_level(beatline::config::get().log_level.as_level_filter());

    let chart_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "charts/demo.txt".to_string());
    app::run(Path::new(&chart_path)).map_err(Into::into)
}
