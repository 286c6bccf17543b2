use super::{GridLevel, Level};

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Builds a fresh instance of a level.
pub type LevelFactory = Box<dyn Fn() -> Box<dyn Level>>;

/// Maps level codes to level factories.
pub struct LevelCatalog {
    levels: HashMap<String, LevelFactory>,
}

impl LevelCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self {
            levels: HashMap::new(),
        }
    }

    /// The levels shipped with the server.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();

        catalog.register("tutorial", || GridLevel::generated(9, 9, 0x5eed));
        catalog.register("maze", || {
            GridLevel::generated(33, 33, 0x6d617a65).with_max_time(Duration::from_secs(300))
        });
        catalog.register("duo", || {
            GridLevel::generated(33, 33, 0x64756f)
                .with_max_connections(2)
                .with_max_time(Duration::from_secs(300))
        });
        catalog.register("big", || {
            GridLevel::generated(101, 101, 0x626967)
                .with_max_connections(4)
                .with_max_time(Duration::from_secs(900))
        });

        catalog
    }

    /// Registers a level under `code`, replacing any previous one.
    pub fn register<F, L>(&mut self, code: &str, factory: F)
    where
        F: Fn() -> L + 'static,
        L: Level + 'static,
    {
        self.levels
            .insert(code.to_string(), Box::new(move || Box::new(factory())));
    }

    /// Starts a new instance of the level named `code`.
    pub fn open(&self, code: &str) -> Option<Box<dyn Level>> {
        self.levels.get(code).map(|factory| factory())
    }

    /// Returns `true` if a level named `code` exists.
    pub fn contains(&self, code: &str) -> bool {
        self.levels.contains_key(code)
    }
}

impl Default for LevelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for LevelCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut codes: Vec<_> = self.levels.keys().collect();
        codes.sort();
        f.debug_struct("LevelCatalog").field("levels", &codes).finish()
    }
}
