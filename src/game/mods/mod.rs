pub mod life;

use log::warn;
use rustc_hash::FxHashMap;

use crate::game::play::Playfield;

/// A highway pass run at a fixed point inside the tick. Hooks execute
/// synchronously with full mutable access to the simulation and must keep
/// every cell in the `{empty, tap, positive hold count}` domain; the core
/// only checks this in debug builds.
pub trait HighwayMod {
    fn apply(&self, field: &mut Playfield);
}

/// One registered mod: a pre-rotation and/or post-rotation pass, both
/// independently optional.
#[derive(Default)]
pub struct ModEntry {
    pub pre: Option<Box<dyn HighwayMod>>,
    pub post: Option<Box<dyn HighwayMod>>,
}

/// Per-session mod registry. At most one entry is active; the driver
/// selects it (typically from a settings screen) and passes the registry
/// to every `tick`.
#[derive(Default)]
pub struct ModRegistry {
    entries: FxHashMap<String, ModEntry>,
    active: Option<String>,
}

impl ModRegistry {
    pub fn new() -> Self {
        ModRegistry::default()
    }

    /// Registers `name`, replacing any previous entry with that name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        pre: Option<Box<dyn HighwayMod>>,
        post: Option<Box<dyn HighwayMod>>,
    ) {
        self.entries.insert(name.into(), ModEntry { pre, post });
    }

    /// Selects the entry whose hooks run during ticks. Returns false and
    /// leaves the selection unchanged when the name is unknown.
    pub fn activate(&mut self, name: &str) -> bool {
        if self.entries.contains_key(name) {
            self.active = Some(name.to_string());
            true
        } else {
            warn!("cannot activate unknown mod '{name}'");
            false
        }
    }

    pub fn deactivate(&mut self) {
        self.active = None;
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_entry(&self) -> Option<&ModEntry> {
        self.entries.get(self.active.as_deref()?)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{HighwayMod, ModRegistry};
    use crate::game::highway::CELL_TAP;
    use crate::game::note::Timeline;
    use crate::game::play::Playfield;

    struct StampTopRow;

    impl HighwayMod for StampTopRow {
        fn apply(&self, field: &mut Playfield) {
            for lane in 0..field.lane_count() {
                field.lane_mut(lane).set(0, CELL_TAP);
            }
        }
    }

    #[test]
    fn activation_selects_a_known_entry_only() {
        let mut registry = ModRegistry::new();
        registry.register("stamp", Some(Box::new(StampTopRow)), None);

        assert!(!registry.activate("missing"));
        assert_eq!(registry.active_name(), None);
        assert!(registry.activate("stamp"));
        assert_eq!(registry.active_name(), Some("stamp"));
        registry.deactivate();
        assert!(registry.active_entry().is_none());
    }

    #[test]
    fn active_hooks_run_inside_the_tick() {
        let mut registry = ModRegistry::new();
        registry.register("stamp", None, Some(Box::new(StampTopRow)));
        registry.activate("stamp");

        let mut field = Playfield::new(2, 4, 100, Timeline::default());
        field.tick(&registry);
        for lane in 0..2 {
            assert_eq!(field.lane(lane).get(0), CELL_TAP, "post hook stamped lane {lane}");
        }
    }

    #[test]
    fn inactive_registry_is_inert() {
        let mut registry = ModRegistry::new();
        registry.register("stamp", Some(Box::new(StampTopRow)), None);

        let mut field = Playfield::new(1, 4, 100, Timeline::default());
        field.tick(&registry);
        assert_eq!(field.lane(0).get(0), 0);
    }
}
