//! Random teleport geometry and the safety search that consumes it.

use crate::config::{RtpConfig, RtpRange};
use crate::error::TeleportError;
use crate::sync::lock;
use crate::world::host::WorldQuery;
use crate::world::position::{Coordinate, Location};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::f64::consts::TAU;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A horizontal point proposed for a random teleport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub x: f64,
    pub z: f64,
}

impl Candidate {
    pub fn block_x(self) -> i32 {
        self.x.floor() as i32
    }

    pub fn block_z(self) -> i32 {
        self.z.floor() as i32
    }

    pub fn distance_from(self, center_x: f64, center_z: f64) -> f64 {
        (self.x - center_x).hypot(self.z - center_z)
    }
}

pub struct RandomLocationLocator {
    default_range: RtpRange,
    worlds: HashMap<String, RtpRange>,
    rng: Mutex<StdRng>,
}

impl RandomLocationLocator {
    pub fn new(config: &RtpConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_seed(config: &RtpConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &RtpConfig, rng: StdRng) -> Self {
        let worlds = config
            .worlds
            .iter()
            .map(|(name, range)| (name.clone(), RtpRange::new(range.min_range, range.max_range)))
            .collect();
        Self {
            default_range: config.default_range(),
            worlds,
            rng: Mutex::new(rng),
        }
    }

    pub fn range_for(&self, world: &str) -> RtpRange {
        self.worlds.get(world).copied().unwrap_or(self.default_range)
    }

    /// `count` points at a uniform angle and a uniform radius within the
    /// world's range around the center.
    pub fn generate_candidates(
        &self,
        center_x: f64,
        center_z: f64,
        world: &str,
        count: usize,
    ) -> Vec<Candidate> {
        let range = self.range_for(world);
        let mut rng = lock(&self.rng);
        (0..count)
            .map(|_| {
                let angle = rng.gen_range(0.0..TAU);
                let radius = rng.gen_range(range.min_range..=range.max_range);
                Candidate {
                    x: center_x + radius * angle.cos(),
                    z: center_z + radius * angle.sin(),
                }
            })
            .collect()
    }
}

/// Checks candidates against the world before a random teleport.
pub struct SafeLocationFinder {
    query: Arc<dyn WorldQuery>,
    min_surface_y: i32,
    chunk_load_timeout: Duration,
}

impl SafeLocationFinder {
    pub fn new(query: Arc<dyn WorldQuery>, config: &RtpConfig) -> Self {
        Self {
            query,
            min_surface_y: config.min_surface_y,
            chunk_load_timeout: config.chunk_load_timeout(),
        }
    }

    /// Landing spot for `candidate`, standing on the ground, or `None` when
    /// the column is unloaded, too low or near a hazard.
    pub fn validate(&self, world: &str, candidate: Candidate) -> Option<Location> {
        let x = candidate.block_x();
        let z = candidate.block_z();
        if !self.query.is_chunk_loaded(world, x, z)
            && !self.query.load_chunk(world, x, z, self.chunk_load_timeout)
        {
            tracing::trace!(world, x, z, "candidate chunk unavailable");
            return None;
        }
        let ground = self.query.ground_height_at(world, x, z)?;
        if ground < self.min_surface_y {
            return None;
        }
        let y = ground + 1;
        if (y - 2..=y + 3).any(|dy| self.query.is_hazard_at(world, x, dy, z)) {
            return None;
        }
        let neighbours = [(x + 1, z), (x - 1, z), (x, z + 1), (x, z - 1)];
        if neighbours
            .iter()
            .any(|&(nx, nz)| self.query.is_hazard_at(world, nx, y, nz))
        {
            return None;
        }
        Some(Location {
            world: world.to_string(),
            coordinate: Coordinate::new(f64::from(x) + 0.5, f64::from(y), f64::from(z) + 0.5),
            facing: Default::default(),
        })
    }

    /// First safe candidate in order, or `SearchFailed` once all are spent.
    pub fn find(
        &self,
        locator: &RandomLocationLocator,
        world: &str,
        center: Coordinate,
        attempts: usize,
    ) -> Result<Location, TeleportError> {
        let candidates = locator.generate_candidates(center.x, center.z, world, attempts);
        for (attempt, candidate) in candidates.into_iter().enumerate() {
            if let Some(location) = self.validate(world, candidate) {
                tracing::debug!(world, attempt = attempt + 1, %location, "safe location found");
                return Ok(location);
            }
        }
        tracing::info!(world, attempts, "random location search exhausted");
        Err(TeleportError::SearchFailed { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::sim::{Ground, SimWorld};

    fn config() -> RtpConfig {
        let mut config = RtpConfig {
            min_range: 100.0,
            max_range: 500.0,
            ..RtpConfig::default()
        };
        config
            .worlds
            .insert("nether".to_string(), RtpRange::new(10.0, 20.0));
        config
    }

    #[test]
    fn candidates_fall_within_the_range_band() {
        let locator = RandomLocationLocator::with_seed(&config(), 7);
        let candidates = locator.generate_candidates(250.0, -40.0, "overworld", 5);
        assert_eq!(candidates.len(), 5);
        for candidate in candidates {
            let distance = candidate.distance_from(250.0, -40.0);
            assert!(distance >= 100.0 - 1e-6 && distance <= 500.0 + 1e-6);
        }
    }

    #[test]
    fn world_override_is_used() {
        let locator = RandomLocationLocator::with_seed(&config(), 11);
        for candidate in locator.generate_candidates(0.0, 0.0, "nether", 200) {
            let distance = candidate.distance_from(0.0, 0.0);
            assert!(distance >= 10.0 - 1e-6 && distance <= 20.0 + 1e-6);
        }
    }

    #[test]
    fn degenerate_range_is_a_circle() {
        let mut config = config();
        config.min_range = 50.0;
        config.max_range = 50.0;
        let locator = RandomLocationLocator::with_seed(&config, 3);
        for candidate in locator.generate_candidates(0.0, 0.0, "overworld", 20) {
            assert!((candidate.distance_from(0.0, 0.0) - 50.0).abs() < 1e-6);
        }
    }

    #[test]
    fn same_seed_same_candidates() {
        let a = RandomLocationLocator::with_seed(&config(), 99);
        let b = RandomLocationLocator::with_seed(&config(), 99);
        assert_eq!(
            a.generate_candidates(0.0, 0.0, "overworld", 4),
            b.generate_candidates(0.0, 0.0, "overworld", 4)
        );
    }

    #[test]
    fn validate_lands_on_top_of_ground() {
        let world = Arc::new(SimWorld::new());
        world.set_ground(Ground::Flat(70));
        let finder = SafeLocationFinder::new(world, &config());
        let location = finder
            .validate("overworld", Candidate { x: 10.2, z: -3.7 })
            .expect("safe");
        assert_eq!(location.coordinate, Coordinate::new(10.5, 71.0, -3.5));
    }

    #[test]
    fn validate_rejects_unsafe_columns() {
        let world = Arc::new(SimWorld::new());
        let finder = SafeLocationFinder::new(world.clone(), &config());
        let spot = Candidate { x: 5.0, z: 5.0 };

        world.set_ground(Ground::Flat(40));
        assert!(finder.validate("overworld", spot).is_none());
        world.set_ground(Ground::Void);
        assert!(finder.validate("overworld", spot).is_none());

        world.set_ground(Ground::Flat(64));
        world.add_hazard("overworld", 6, 5);
        assert!(finder.validate("overworld", spot).is_none());
        assert!(finder.validate("nether", spot).is_some());

        world.set_chunks(false, false);
        assert!(finder.validate("nether", spot).is_none());
        world.set_chunks(false, true);
        assert!(finder.validate("nether", spot).is_some());
    }

    #[test]
    fn exhausted_search_reports_attempts() {
        let world = Arc::new(SimWorld::new());
        world.set_ground(Ground::Void);
        let finder = SafeLocationFinder::new(world, &config());
        let locator = RandomLocationLocator::with_seed(&config(), 1);
        assert_eq!(
            finder.find(&locator, "overworld", Coordinate::default(), 4),
            Err(TeleportError::SearchFailed { attempts: 4 })
        );
    }

    #[test]
    fn search_returns_first_safe_candidate() {
        let world = Arc::new(SimWorld::new());
        world.set_ground(Ground::Rolling {
            base: 60,
            amplitude: 20,
        });
        let finder = SafeLocationFinder::new(world, &config());
        let locator = RandomLocationLocator::with_seed(&config(), 5);
        let location = finder
            .find(&locator, "overworld", Coordinate::default(), 200)
            .expect("some column is high enough");
        assert!(location.coordinate.y >= 51.0);
    }
}
