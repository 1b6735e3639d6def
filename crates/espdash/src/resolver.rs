//! Three-tier firmware version resolution
//!
//! Pure functions over an explicit state struct, invoked by the update
//! entity but kept free of entity lifecycle so the tie-break logic can be
//! tested in isolation.

/// Ranked-source evaluator: the first present value wins.
pub fn first_version<'a, I>(sources: I) -> Option<&'a str>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    sources.into_iter().flatten().next()
}

/// Per-entity version resolution state.
///
/// The live tier itself is read from the live feed at resolution time; this
/// struct tracks the cached tier and whether a live source has been linked.
#[derive(Debug, Clone, Default)]
pub struct VersionState {
    cached: Option<String>,
    live_linked: bool,
}

impl VersionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live source has been linked to this entity.
    pub fn live_linked(&self) -> bool {
        self.live_linked
    }

    pub fn cached(&self) -> Option<&str> {
        self.cached.as_deref()
    }

    /// Record that a live source now exists.
    ///
    /// The cached tier is discarded: once live data has been seen, a stale
    /// cached value must never be read again, even if the live source later
    /// stops reporting a version.
    pub fn link_live(&mut self) {
        self.live_linked = true;
        self.cached = None;
    }

    /// Store the result of a direct device query.
    ///
    /// Ignored while a live source is linked; the live tier outranks it.
    pub fn store_cached(&mut self, version: Option<String>) {
        if !self.live_linked {
            self.cached = version;
        }
    }

    /// Drop the cached tier (after a successful install).
    pub fn clear_cached(&mut self) {
        self.cached = None;
    }

    /// Resolve the installed version: live > cached > dashboard.
    pub fn installed_version<'a>(
        &'a self,
        live: Option<&'a str>,
        dashboard: Option<&'a str>,
    ) -> Option<&'a str> {
        first_version([live, self.cached.as_deref(), dashboard])
    }
}
