use super::Smoother;

/// Pass-through: the forecast is the last value seen
#[derive(Debug, Default)]
pub struct DummySmoother {
    last: Option<f64>,
}

impl DummySmoother {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Smoother for DummySmoother {
    fn smooth(&mut self, value: f64) -> f64 {
        self.last = Some(value);
        value
    }

    fn forecast(&self, _horizon: u32) -> f64 {
        self.last.unwrap_or(f64::NAN)
    }

    fn reset(&mut self) {
        self.last = None;
    }

    fn name(&self) -> &'static str {
        "dummy"
    }
}

/// Brown's single exponential smoothing (level only)
#[derive(Debug)]
pub struct BrownSingleSmoother {
    alpha: f64,
    level: Option<f64>,
}

impl BrownSingleSmoother {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, level: None }
    }
}

impl Smoother for BrownSingleSmoother {
    fn smooth(&mut self, value: f64) -> f64 {
        let level = match self.level {
            None => value,
            Some(s) => self.alpha * value + (1.0 - self.alpha) * s,
        };
        self.level = Some(level);
        level
    }

    fn forecast(&self, _horizon: u32) -> f64 {
        self.level.unwrap_or(f64::NAN)
    }

    fn reset(&mut self) {
        self.level = None;
    }

    fn name(&self) -> &'static str {
        "brown_single"
    }
}

/// Brown's double exponential smoothing (one factor for level and trend)
///
/// Smooths twice with the same `alpha`; the level is `2 s1 - s2` and the
/// trend `alpha / (1 - alpha) * (s1 - s2)`.
#[derive(Debug)]
pub struct BrownDoubleSmoother {
    alpha: f64,
    stats: Option<(f64, f64)>,
}

impl BrownDoubleSmoother {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, stats: None }
    }

    fn level_and_trend(&self) -> Option<(f64, f64)> {
        self.stats.map(|(s1, s2)| {
            let a = 2.0 * s1 - s2;
            let b = self.alpha / (1.0 - self.alpha) * (s1 - s2);
            (a, b)
        })
    }
}

impl Smoother for BrownDoubleSmoother {
    fn smooth(&mut self, value: f64) -> f64 {
        let alpha = self.alpha;
        self.stats = Some(match self.stats {
            None => (value, value),
            Some((s1, s2)) => {
                let s1 = alpha * value + (1.0 - alpha) * s1;
                let s2 = alpha * s1 + (1.0 - alpha) * s2;
                (s1, s2)
            }
        });
        self.forecast(0)
    }

    fn forecast(&self, horizon: u32) -> f64 {
        match self.level_and_trend() {
            Some((a, b)) => a + horizon as f64 * b,
            None => f64::NAN,
        }
    }

    fn reset(&mut self) {
        self.stats = None;
    }

    fn name(&self) -> &'static str {
        "brown_double"
    }
}

/// Holt-Winters double exponential smoothing (separate level and trend factors)
///
/// The first value sets the level, the second the initial trend.
#[derive(Debug)]
pub struct HoltWintersSmoother {
    alpha: f64,
    beta: f64,
    level: Option<f64>,
    trend: Option<f64>,
}

impl HoltWintersSmoother {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self {
            alpha,
            beta,
            level: None,
            trend: None,
        }
    }

    /// Derive both factors from a single damping factor:
    /// `alpha = 1 - (1 - delta)^2`, `beta = delta^2 / alpha`
    pub fn from_delta(delta: f64) -> Self {
        let alpha = 1.0 - (1.0 - delta) * (1.0 - delta);
        let beta = delta * delta / alpha;
        Self::new(alpha, beta)
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }
}

impl Smoother for HoltWintersSmoother {
    fn smooth(&mut self, value: f64) -> f64 {
        match (self.level, self.trend) {
            (None, _) => self.level = Some(value),
            (Some(s), None) => self.trend = Some(value - s),
            (Some(old), Some(b)) => {
                let s = self.alpha * value + (1.0 - self.alpha) * (old + b);
                self.trend = Some(self.beta * (s - old) + (1.0 - self.beta) * b);
                self.level = Some(s);
            }
        }
        self.level.unwrap_or(f64::NAN)
    }

    fn forecast(&self, horizon: u32) -> f64 {
        match self.level {
            Some(s) => s + horizon as f64 * self.trend.unwrap_or(0.0),
            None => f64::NAN,
        }
    }

    fn reset(&mut self) {
        self.level = None;
        self.trend = None;
    }

    fn name(&self) -> &'static str {
        "holt_winters"
    }
}
