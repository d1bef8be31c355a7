//! Per-module build profiles

use std::time::{Duration, Instant};

use serde::Serialize;

/// Wall-clock timing of one module's trip through the scheduler.
///
/// Purely diagnostic: nothing in the build reads these values for control
/// flow.
#[derive(Debug, Clone, Default)]
pub struct ModuleProfile {
    /// Reading the source and resolving its dependency requests
    pub factory: Duration,

    /// Probing the cache
    pub restoring: Duration,

    /// Building on a cache miss
    pub building: Duration,

    /// Merging the result into the dependency graph
    pub integration: Duration,

    pub started: Option<Instant>,

    pub finished: Option<Instant>,

    /// Average number of tasks running while this one ran (1.0 = alone)
    pub parallelism_factor: f64,

    /// Transient failures retried
    pub retries: u32,
}

impl ModuleProfile {
    pub fn total(&self) -> Duration {
        self.factory + self.restoring + self.building + self.integration
    }

    fn span(&self) -> Option<(Instant, Instant)> {
        Some((self.started?, self.finished?))
    }
}

/// Aggregated view, as printed by `--profile`
#[derive(Debug, Clone, Serialize)]
pub struct ProfileSummary {
    pub identifier: String,
    pub factory_ms: f64,
    pub restoring_ms: f64,
    pub building_ms: f64,
    pub integration_ms: f64,
    pub parallelism_factor: f64,
}

impl ProfileSummary {
    pub fn new(identifier: &str, profile: &ModuleProfile) -> Self {
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        Self {
            identifier: identifier.to_string(),
            factory_ms: ms(profile.factory),
            restoring_ms: ms(profile.restoring),
            building_ms: ms(profile.building),
            integration_ms: ms(profile.integration),
            parallelism_factor: profile.parallelism_factor,
        }
    }
}

/// Fill in `parallelism_factor` for every profile: one plus the summed
/// overlap with every other task, divided by the task's own duration.
pub fn compute_parallelism(profiles: &mut [&mut ModuleProfile]) {
    let mut spans: Vec<(usize, Instant, Instant)> = profiles
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.span().map(|(s, e)| (i, s, e)))
        .collect();
    spans.sort_by_key(|&(_, start, _)| start);

    for (pos, &(i, start, end)) in spans.iter().enumerate() {
        let own = end.saturating_duration_since(start);
        if own.is_zero() {
            profiles[i].parallelism_factor = 1.0;
            continue;
        }

        let mut overlap = Duration::ZERO;
        // Earlier starters that are still running
        for &(_, other_start, other_end) in spans[..pos].iter() {
            if other_end > start {
                overlap += other_end.min(end).saturating_duration_since(start.max(other_start));
            }
        }
        // Later starters, until one starts after we finish
        for &(_, other_start, other_end) in spans[pos + 1..].iter() {
            if other_start >= end {
                break;
            }
            overlap += other_end.min(end).saturating_duration_since(other_start);
        }

        profiles[i].parallelism_factor = 1.0 + overlap.as_secs_f64() / own.as_secs_f64();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(base: Instant, start_ms: u64, end_ms: u64) -> ModuleProfile {
        ModuleProfile {
            started: Some(base + Duration::from_millis(start_ms)),
            finished: Some(base + Duration::from_millis(end_ms)),
            ..Default::default()
        }
    }

    #[test]
    fn test_parallelism_factor() {
        let base = Instant::now();
        let mut a = profile(base, 0, 100);
        let mut b = profile(base, 0, 100);
        let mut c = profile(base, 200, 300);

        compute_parallelism(&mut [&mut a, &mut b, &mut c]);

        assert!((a.parallelism_factor - 2.0).abs() < 1e-6);
        assert!((b.parallelism_factor - 2.0).abs() < 1e-6);
        assert!((c.parallelism_factor - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_partial_overlap() {
        let base = Instant::now();
        let mut a = profile(base, 0, 100);
        let mut b = profile(base, 50, 150);

        compute_parallelism(&mut [&mut a, &mut b]);

        assert!((a.parallelism_factor - 1.5).abs() < 1e-6);
        assert!((b.parallelism_factor - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_summary_in_milliseconds() {
        let profile = ModuleProfile {
            building: Duration::from_millis(12),
            ..Default::default()
        };
        let summary = ProfileSummary::new("./a.js", &profile);
        assert!((summary.building_ms - 12.0).abs() < 1e-6);
        assert_eq!(profile.total(), Duration::from_millis(12));
    }
}
