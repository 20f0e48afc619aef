/// Highest envelope rate parameter.
pub const MAX_RATE: u8 = 31;
/// Highest level parameter (sustain, operator output).
pub const MAX_LEVEL: u8 = 99;

/// Converts an envelope rate parameter into a stage duration in seconds.
/// Rate 0 is instantaneous; each step lengthens the stage geometrically,
/// from 1 ms at rate 1 to roughly 10 s at rate 31.
pub fn rate_to_seconds(rate: u8) -> f32 {
    if rate == 0 {
        0.0
    } else {
        0.001 * 2f32.powf((rate.min(MAX_RATE) - 1) as f32 / 2.25)
    }
}

fn seconds_to_samples(seconds: f32, sample_rate: f32) -> u32 {
    (seconds * sample_rate).round().max(0.0) as u32
}

/// Raw envelope parameters as stored in a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeParams {
    pub attack: u8,
    pub decay: u8,
    pub sustain: u8,
    pub release: u8,
}

impl EnvelopeParams {
    pub fn sustain_level(&self) -> f32 {
        self.sustain.min(MAX_LEVEL) as f32 / MAX_LEVEL as f32
    }

    pub fn attack_samples(&self, sample_rate: f32) -> u32 {
        seconds_to_samples(rate_to_seconds(self.attack), sample_rate)
    }

    pub fn decay_samples(&self, sample_rate: f32) -> u32 {
        seconds_to_samples(rate_to_seconds(self.decay), sample_rate)
    }

    pub fn release_samples(&self, sample_rate: f32) -> u32 {
        seconds_to_samples(rate_to_seconds(self.release), sample_rate)
    }
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self {
            attack: 0,
            decay: 10,
            sustain: MAX_LEVEL,
            release: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    Attack,
    Decay,
    Sustain,
    Release,
    Idle,
}

/// Per-operator envelope runtime state. Ramps are linear; a zero-length stage
/// is crossed immediately so an instant attack is already at full level on
/// the first sample.
#[derive(Debug, Clone)]
pub struct EnvelopeState {
    stage: EnvelopeStage,
    level: f32,
    step: f32,
    elapsed: u64, // samples spent in the current stage
}

impl EnvelopeState {
    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    pub fn is_idle(&self) -> bool {
        self.stage == EnvelopeStage::Idle
    }

    /// Enters Attack from the current level, so a retriggered note ramps up
    /// from wherever it was instead of jumping to zero.
    pub fn trigger(&mut self, params: &EnvelopeParams, sample_rate: f32) {
        self.enter(EnvelopeStage::Attack, params, sample_rate);
    }

    /// Note-off: any non-idle stage moves to Release.
    pub fn release(&mut self, params: &EnvelopeParams, sample_rate: f32) {
        if self.stage != EnvelopeStage::Idle && self.stage != EnvelopeStage::Release {
            self.enter(EnvelopeStage::Release, params, sample_rate);
        }
    }

    /// Release over an explicit number of samples, used when a voice is stolen.
    pub fn force_release(&mut self, fade_samples: u32) {
        if self.stage == EnvelopeStage::Idle {
            return;
        }
        if fade_samples == 0 || self.level <= 0.0 {
            self.go_idle();
        } else {
            self.stage = EnvelopeStage::Release;
            self.elapsed = 0;
            self.step = -self.level / fade_samples as f32;
        }
    }

    /// Drops straight to silence.
    pub fn kill(&mut self) {
        self.go_idle();
    }

    /// Returns the level for the current sample and moves one sample forward.
    pub fn advance(&mut self, params: &EnvelopeParams, sample_rate: f32) -> f32 {
        let out = self.level;
        self.elapsed += 1;
        match self.stage {
            EnvelopeStage::Attack => {
                self.level += self.step;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.enter(EnvelopeStage::Decay, params, sample_rate);
                }
            }
            EnvelopeStage::Decay => {
                self.level += self.step;
                if self.level <= params.sustain_level() {
                    self.enter(EnvelopeStage::Sustain, params, sample_rate);
                }
            }
            EnvelopeStage::Release => {
                self.level += self.step;
                if self.level <= 0.0 {
                    self.go_idle();
                }
            }
            EnvelopeStage::Sustain | EnvelopeStage::Idle => {}
        }
        out
    }

    fn enter(&mut self, stage: EnvelopeStage, params: &EnvelopeParams, sample_rate: f32) {
        self.stage = stage;
        self.elapsed = 0;
        self.step = 0.0;
        match stage {
            EnvelopeStage::Attack => {
                let samples = params.attack_samples(sample_rate);
                if samples == 0 || self.level >= 1.0 {
                    self.level = 1.0;
                    self.enter(EnvelopeStage::Decay, params, sample_rate);
                } else {
                    self.step = (1.0 - self.level) / samples as f32;
                }
            }
            EnvelopeStage::Decay => {
                let target = params.sustain_level();
                let samples = params.decay_samples(sample_rate);
                if samples == 0 || self.level <= target {
                    self.enter(EnvelopeStage::Sustain, params, sample_rate);
                } else {
                    self.step = (target - self.level) / samples as f32;
                }
            }
            EnvelopeStage::Sustain => {
                self.level = params.sustain_level();
            }
            EnvelopeStage::Release => {
                let samples = params.release_samples(sample_rate);
                if samples == 0 || self.level <= 0.0 {
                    self.go_idle();
                } else {
                    self.step = -self.level / samples as f32;
                }
            }
            EnvelopeStage::Idle => self.go_idle(),
        }
    }

    fn go_idle(&mut self) {
        self.stage = EnvelopeStage::Idle;
        self.level = 0.0;
        self.step = 0.0;
        self.elapsed = 0;
    }
}

impl Default for EnvelopeState {
    fn default() -> Self {
        Self {
            stage: EnvelopeStage::Idle,
            level: 0.0,
            step: 0.0,
            elapsed: 0,
        }
    }
}
