use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountPhase {
    Idle,
    Attempting,
    Mounted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RouteState {
    last_attempt_at: Option<u64>,
    injected: bool,
    attempting: bool,
}

impl RouteState {
    fn phase(&self) -> MountPhase {
        if self.injected {
            MountPhase::Mounted
        } else if self.attempting {
            MountPhase::Attempting
        } else {
            MountPhase::Idle
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptGate {
    Proceed,
    InFlight,
    AlreadyMounted,
    CoolingDown { remaining_ms: u64 },
}

/// Page-lifetime bookkeeping shared by every mount pass.
#[derive(Debug, Default)]
pub struct MountContext {
    cooldown_ms: u64,
    routes: HashMap<String, RouteState>,
    loaded_assets: HashSet<String>,
}

impl MountContext {
    #[must_use]
    pub fn new(cooldown_ms: u64) -> Self {
        Self {
            cooldown_ms,
            ..Self::default()
        }
    }

    /// Decides whether a pass for `route` may run at `now_ms`, and if so marks
    /// it as attempting.
    pub fn begin_attempt(&mut self, route: &str, now_ms: u64) -> AttemptGate {
        let cooldown_ms = self.cooldown_ms;
        let state = self.routes.entry(route.to_string()).or_default();
        if state.injected {
            return AttemptGate::AlreadyMounted;
        }
        if state.attempting {
            return AttemptGate::InFlight;
        }
        if let Some(last) = state.last_attempt_at {
            let elapsed = now_ms.saturating_sub(last);
            if elapsed < cooldown_ms {
                return AttemptGate::CoolingDown {
                    remaining_ms: cooldown_ms - elapsed,
                };
            }
        }
        state.last_attempt_at = Some(now_ms);
        state.attempting = true;
        AttemptGate::Proceed
    }

    pub fn finish_attempt(&mut self, route: &str, injected: bool) {
        if let Some(state) = self.routes.get_mut(route) {
            state.attempting = false;
            state.injected = injected;
        }
    }

    pub fn clear_cooldown(&mut self, route: &str) {
        if let Some(state) = self.routes.get_mut(route) {
            state.last_attempt_at = None;
        }
    }

    /// Forgets the mounted flag so the next pass runs again. An attempt that
    /// is still in flight keeps its marker.
    pub fn clear_route(&mut self, route: &str) {
        if let Some(state) = self.routes.get_mut(route) {
            state.injected = false;
            state.last_attempt_at = None;
        }
    }

    pub fn clear_all(&mut self) {
        for state in self.routes.values_mut() {
            state.injected = false;
            state.last_attempt_at = None;
        }
    }

    #[must_use]
    pub fn phase(&self, route: &str) -> MountPhase {
        self.routes
            .get(route)
            .map_or(MountPhase::Idle, RouteState::phase)
    }

    #[must_use]
    pub fn is_mounted(&self, route: &str) -> bool {
        self.phase(route) == MountPhase::Mounted
    }

    /// Returns `true` the first time `asset` is seen.
    pub fn mark_asset_loaded(&mut self, asset: &str) -> bool {
        self.loaded_assets.insert(asset.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_blocks_repeat_attempts() {
        let mut context = MountContext::new(1_000);
        assert_eq!(context.begin_attempt("/home", 10), AttemptGate::Proceed);
        assert_eq!(context.phase("/home"), MountPhase::Attempting);
        assert_eq!(context.begin_attempt("/home", 20), AttemptGate::InFlight);
        context.finish_attempt("/home", false);
        assert_eq!(
            context.begin_attempt("/home", 510),
            AttemptGate::CoolingDown { remaining_ms: 500 }
        );
        assert_eq!(context.begin_attempt("/home", 1_010), AttemptGate::Proceed);
    }

    #[test]
    fn mounted_route_stays_mounted_until_cleared() {
        let mut context = MountContext::new(1_000);
        assert_eq!(context.begin_attempt("/home", 0), AttemptGate::Proceed);
        context.finish_attempt("/home", true);
        assert!(context.is_mounted("/home"));
        assert_eq!(context.begin_attempt("/home", 5_000), AttemptGate::AlreadyMounted);
        assert!(!context.is_mounted("/details"));

        context.clear_route("/home");
        assert_eq!(context.phase("/home"), MountPhase::Idle);
        assert_eq!(context.begin_attempt("/home", 5_001), AttemptGate::Proceed);
    }

    #[test]
    fn clearing_cooldown_allows_immediate_retry() {
        let mut context = MountContext::new(1_000);
        assert_eq!(context.begin_attempt("/home", 0), AttemptGate::Proceed);
        context.finish_attempt("/home", false);
        context.clear_cooldown("/home");
        assert_eq!(context.begin_attempt("/home", 1), AttemptGate::Proceed);
    }

    #[test]
    fn assets_are_loaded_once() {
        let mut context = MountContext::default();
        assert!(context.mark_asset_loaded("schedule-widget.css"));
        assert!(!context.mark_asset_loaded("schedule-widget.css"));
    }
}
