use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

/// Probability that a button press also plays the beep-boop clip.
pub const DEFAULT_BEEP_BOOP_PROBABILITY: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sfx {
    Button,
    TapBody,
    TapGlass,
    CassetteIn,
    CassetteOut,
    BeepBoop,
    Chuckle,
    Hmm,
    TvOn,
    TvOff,
}

/// Where clips actually go. The engine only decides *what* to play.
pub trait SoundSink: Send {
    fn play(&mut self, sfx: Sfx, clip: &str);
}

/// Keeps a shared list of played effects.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct RecordingSink {
    played: std::sync::Arc<std::sync::Mutex<Vec<Sfx>>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn played(&self) -> Vec<Sfx> {
        self.played.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn count(&self, sfx: Sfx) -> usize {
        self.played().iter().filter(|s| **s == sfx).count()
    }

    pub fn clear(&self) {
        if let Ok(mut p) = self.played.lock() {
            p.clear();
        }
    }
}

#[cfg(test)]
impl SoundSink for RecordingSink {
    fn play(&mut self, sfx: Sfx, _clip: &str) {
        if let Ok(mut p) = self.played.lock() {
            p.push(sfx);
        }
    }
}

#[derive(Clone, Copy)]
enum Strategy {
    RoundRobin,
    Random,
}

struct Pool {
    clips: VecDeque<&'static str>,
    strategy: Strategy,
    cooldown: Duration,
    last_played: Option<Instant>,
}

impl Pool {
    fn new(strategy: Strategy, cooldown_ms: u64, clips: &[(&'static str, usize)]) -> Self {
        let clips = clips
            .iter()
            .flat_map(|(name, copies)| std::iter::repeat_n(*name, *copies))
            .collect();
        Self {
            clips,
            strategy,
            cooldown: Duration::from_millis(cooldown_ms),
            last_played: None,
        }
    }
}

/// Which clips a button press produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PressSounds {
    pub button: bool,
    pub beep_boop: bool,
}

/// Owned sound-effect pools with per-effect cooldowns.
///
/// Built once by whoever owns the companion and handed to the engine; nothing
/// here is global.
pub struct SoundEngine {
    pools: HashMap<Sfx, Pool>,
    sink: Box<dyn SoundSink>,
    rng: StdRng,
    beep_boop_probability: f64,
    enabled: bool,
}

impl SoundEngine {
    pub fn new(sink: Box<dyn SoundSink>, beep_boop_probability: f64) -> Self {
        Self::with_rng(sink, beep_boop_probability, StdRng::from_entropy())
    }

    pub fn with_rng(sink: Box<dyn SoundSink>, beep_boop_probability: f64, rng: StdRng) -> Self {
        use Strategy::*;
        let mut pools = HashMap::new();
        pools.insert(Sfx::Button, Pool::new(RoundRobin, 80, &[("button_1.wav", 4)]));
        pools.insert(
            Sfx::BeepBoop,
            Pool::new(Random, 80, &[("bmo_beep_1.wav", 2), ("bmo_boop_1.wav", 2), ("bmo_boop_2.wav", 2)]),
        );
        pools.insert(
            Sfx::Chuckle,
            Pool::new(Random, 200, &[("bmo_chuckle_1.wav", 2), ("bmo_chuckle_2.wav", 2)]),
        );
        pools.insert(
            Sfx::Hmm,
            Pool::new(Random, 600, &[("hmm_1.wav", 2), ("hmm_2.wav", 2), ("hmm_3.wav", 2)]),
        );
        pools.insert(Sfx::CassetteIn, Pool::new(RoundRobin, 0, &[("cassette_in.wav", 2)]));
        pools.insert(Sfx::CassetteOut, Pool::new(RoundRobin, 0, &[("cassette_out.wav", 2)]));
        pools.insert(
            Sfx::TapBody,
            Pool::new(Random, 80, &[("tap_body_1.wav", 2), ("tap_body_2.wav", 2), ("tap_body_3.wav", 2)]),
        );
        pools.insert(
            Sfx::TapGlass,
            Pool::new(Random, 120, &[("tap_glass_1.wav", 2), ("tap_glass_2.wav", 2), ("tap_glass_3.wav", 2)]),
        );
        pools.insert(Sfx::TvOn, Pool::new(RoundRobin, 0, &[("tv_on.wav", 2)]));
        pools.insert(Sfx::TvOff, Pool::new(RoundRobin, 0, &[("tv_off.wav", 2)]));

        Self {
            pools,
            sink,
            rng,
            beep_boop_probability: if beep_boop_probability.is_finite() {
                beep_boop_probability.clamp(0.0, 1.0)
            } else {
                DEFAULT_BEEP_BOOP_PROBABILITY
            },
            enabled: true,
        }
    }

    /// Play one clip from the effect's pool. Returns false when the effect is
    /// still cooling down or the engine has been shut down.
    pub fn play(&mut self, sfx: Sfx, now: Instant) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(pool) = self.pools.get_mut(&sfx) else {
            return false;
        };
        if pool.clips.is_empty() {
            return false;
        }
        if let Some(last) = pool.last_played {
            if now.saturating_duration_since(last) < pool.cooldown {
                return false;
            }
        }
        pool.last_played = Some(now);

        let clip = match pool.strategy {
            Strategy::Random => pool.clips[self.rng.gen_range(0..pool.clips.len())],
            Strategy::RoundRobin => {
                let clip = pool.clips[0];
                pool.clips.rotate_left(1);
                clip
            }
        };
        self.sink.play(sfx, clip);
        true
    }

    /// Button click, plus the beep-boop clip with the configured probability.
    pub fn play_press(&mut self, now: Instant) -> PressSounds {
        let button = self.play(Sfx::Button, now);
        let beep_boop = self.rng.gen_bool(self.beep_boop_probability) && self.play(Sfx::BeepBoop, now);
        PressSounds { button, beep_boop }
    }

    /// Roll an independent chance with the engine's RNG. NaN never hits.
    pub fn chance(&mut self, probability: f64) -> bool {
        if probability.is_nan() {
            return false;
        }
        self.rng.gen_bool(probability.clamp(0.0, 1.0))
    }

    #[cfg(test)]
    pub fn beep_boop_probability(&self) -> f64 {
        self.beep_boop_probability
    }

    /// Stop playing anything; pools are released.
    pub fn shutdown(&mut self) {
        if self.enabled {
            debug!("sound engine shut down");
        }
        self.enabled = false;
        self.pools.clear();
    }
}

impl Drop for SoundEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(p: f64) -> (SoundEngine, RecordingSink) {
        let sink = RecordingSink::default();
        let engine = SoundEngine::with_rng(Box::new(sink.clone()), p, StdRng::seed_from_u64(1));
        (engine, sink)
    }

    #[test]
    fn cooldown_suppresses_rapid_repeats() {
        let (mut sfx, sink) = engine(0.0);
        let t0 = Instant::now();
        assert!(sfx.play(Sfx::Button, t0));
        assert!(!sfx.play(Sfx::Button, t0 + Duration::from_millis(79)));
        assert!(sfx.play(Sfx::Button, t0 + Duration::from_millis(80)));
        assert_eq!(sink.count(Sfx::Button), 2);
    }

    #[test]
    fn cassette_and_tv_have_no_cooldown() {
        let (mut sfx, sink) = engine(0.0);
        let t0 = Instant::now();
        assert!(sfx.play(Sfx::CassetteIn, t0));
        assert!(sfx.play(Sfx::CassetteIn, t0));
        assert!(sfx.play(Sfx::TvOff, t0));
        assert_eq!(sink.count(Sfx::CassetteIn), 2);
    }

    #[test]
    fn beep_boop_respects_probability() {
        let (mut never, sink) = engine(0.0);
        let t0 = Instant::now();
        for i in 0..20 {
            let s = never.play_press(t0 + Duration::from_millis(100 * i));
            assert!(s.button);
            assert!(!s.beep_boop);
        }
        assert_eq!(sink.count(Sfx::BeepBoop), 0);

        let (mut always, sink) = engine(1.0);
        assert!(always.play_press(t0).beep_boop);
        assert_eq!(sink.count(Sfx::BeepBoop), 1);
    }

    #[test]
    fn non_finite_probability_falls_back_to_default() {
        for p in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let (mut sfx, _) = engine(p);
            assert_eq!(sfx.beep_boop_probability(), DEFAULT_BEEP_BOOP_PROBABILITY);
            assert!(sfx.play_press(Instant::now()).button);
        }
        let (mut sfx, _) = engine(0.5);
        assert!(!sfx.chance(f64::NAN));
        assert_eq!(engine(7.0).0.beep_boop_probability(), 1.0);
    }

    #[test]
    fn shutdown_silences_engine() {
        let (mut sfx, sink) = engine(1.0);
        sfx.shutdown();
        assert!(!sfx.play(Sfx::TvOn, Instant::now()));
        assert!(sink.played().is_empty());
    }
}
