use rand::Rng;
use thiserror::Error;
use tracing::{debug, error};

/// Base duration in seconds between two discrete updates at scroll speed 1.
pub const BASE_SCROLL_THRESHOLD: f64 = 0.05;
/// World units covered by one unit of background quad scale.
pub const QUAD_UNITS_PER_SCALE: f64 = 10.0;
const DIRECTION_RANGE: f64 = 0.5;
const NOISE_SCALE: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("series needs at least 2 points, got {0}")]
    TooFewPoints(usize),

    #[error("invalid logical range: min {min} must be below max {max}")]
    InvalidRange { min: f64, max: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesConfig {
    pub point_count: usize,
    pub logical_min_y: f64,
    pub logical_max_y: f64,
}

impl SeriesConfig {
    pub fn validate(&self) -> Result<(), SeriesError> {
        if self.point_count < 2 {
            return Err(SeriesError::TooFewPoints(self.point_count));
        }
        let (min, max) = (self.logical_min_y, self.logical_max_y);
        if !(max - min).is_finite() || min >= max {
            return Err(SeriesError::InvalidRange { min, max });
        }
        Ok(())
    }
}

/// Rectangle the series is drawn into, centred on the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderArea {
    pub width: f64,
    pub height: f64,
}

impl RenderArea {
    pub fn new(width: f64, height: f64) -> Self {
        RenderArea { width, height }
    }

    pub fn from_quad_scale(scale_x: f64, scale_y: f64) -> Self {
        RenderArea::new(
            scale_x * QUAD_UNITS_PER_SCALE,
            scale_y * QUAD_UNITS_PER_SCALE,
        )
    }

    pub fn degenerate() -> Self {
        RenderArea {
            width: 0.0,
            height: 0.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// Anything that can draw an ordered polyline.
pub trait PolylineSink {
    fn set_polyline(&mut self, points: &[(f64, f64)]);
}

/// Read side of a simulated price.
pub trait PriceSource {
    fn current_value(&self) -> f64;
}

/// Fixed-length scrolling price series driven by a bounded random walk.
#[derive(Debug)]
pub struct SeriesEngine<R> {
    values: Vec<f64>,
    config: SeriesConfig,
    area: RenderArea,
    current_value: f64,
    scroll_accumulator: f64,
    rng: R,
}

impl<R: Rng> SeriesEngine<R> {
    /// Builds a flat series at one random draw from the logical range.
    pub fn new(
        config: SeriesConfig,
        area: Option<RenderArea>,
        mut rng: R,
    ) -> Result<Self, SeriesError> {
        config.validate()?;
        let initial = rng.random_range(config.logical_min_y..=config.logical_max_y);
        Self::with_initial_value(config, area, initial, rng)
    }

    pub fn with_initial_value(
        config: SeriesConfig,
        area: Option<RenderArea>,
        initial_value: f64,
        rng: R,
    ) -> Result<Self, SeriesError> {
        config.validate()?;
        let area = match area {
            Some(area) if area.is_valid() => area,
            Some(area) => {
                error!(
                    width = area.width,
                    height = area.height,
                    "render area must have a positive size, chart geometry will be empty"
                );
                RenderArea::degenerate()
            }
            None => {
                error!("render area is not assigned, chart geometry will be empty");
                RenderArea::degenerate()
            }
        };
        let initial_value = initial_value.clamp(config.logical_min_y, config.logical_max_y);
        Ok(SeriesEngine {
            values: vec![initial_value; config.point_count],
            config,
            area,
            current_value: initial_value,
            scroll_accumulator: 0.0,
            rng,
        })
    }

    /// Advances the scroll timer and applies at most one discrete update.
    ///
    /// Returns `true` when an update fired. Time beyond one interval is
    /// discarded rather than replayed, so a long stall yields a single step.
    pub fn tick(
        &mut self,
        elapsed_seconds: f64,
        scroll_speed: f64,
        amplitude_multiplier: f64,
    ) -> bool {
        if scroll_speed.is_nan() || scroll_speed <= 0.0 {
            return false;
        }
        if elapsed_seconds.is_finite() && elapsed_seconds > 0.0 {
            self.scroll_accumulator += elapsed_seconds;
        }
        if self.scroll_accumulator < BASE_SCROLL_THRESHOLD / scroll_speed {
            return false;
        }
        self.scroll_accumulator = 0.0;
        // a non-finite amplitude would push NaN past the clamp
        let amplitude = if amplitude_multiplier.is_finite() {
            amplitude_multiplier
        } else {
            0.0
        };
        self.step(amplitude);
        true
    }

    fn step(&mut self, amplitude_multiplier: f64) {
        let last = self.values.len() - 1;
        self.values.copy_within(1.., 0);

        let previous = self.values[last - 1];
        let direction = self.rng.random_range(-DIRECTION_RANGE..=DIRECTION_RANGE);
        let noise = self.rng.random_range(-1.0..=1.0) * NOISE_SCALE;
        let next = (previous + (direction + noise) * amplitude_multiplier)
            .clamp(self.config.logical_min_y, self.config.logical_max_y);

        self.values[last] = next;
        self.current_value = next;
        debug!(previous, next, "series advanced");
    }
}

impl<R> SeriesEngine<R> {
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn render_area(&self) -> RenderArea {
        self.area
    }

    #[cfg(test)]
    pub fn scroll_accumulator(&self) -> f64 {
        self.scroll_accumulator
    }

    /// Maps every sample onto the render area, oldest at the left edge.
    pub fn render_points(&self) -> Vec<(f64, f64)> {
        let last = (self.values.len() - 1) as f64;
        let spacing = self.area.width / last;
        let left = -self.area.width / 2.0;
        self.values
            .iter()
            .enumerate()
            .map(|(i, value)| (left + i as f64 * spacing, self.render_y(*value)))
            .collect()
    }

    pub fn render_y(&self, value: f64) -> f64 {
        let normalized = inverse_lerp(self.config.logical_min_y, self.config.logical_max_y, value);
        -self.area.height / 2.0 + normalized * self.area.height
    }

    /// Inverse of [`render_y`](Self::render_y) for points inside the area.
    pub fn value_for_render_y(&self, y: f64) -> f64 {
        if self.area.height <= 0.0 {
            return self.config.logical_min_y;
        }
        let normalized = inverse_lerp(-self.area.height / 2.0, self.area.height / 2.0, y);
        lerp(self.config.logical_min_y, self.config.logical_max_y, normalized)
    }

    pub fn publish(&self, sink: &mut dyn PolylineSink) {
        sink.set_polyline(&self.render_points());
    }

    /// Change between the oldest visible sample and the current value.
    pub fn window_change(&self) -> f64 {
        self.current_value - self.values()[0]
    }

    pub fn price_label(&self) -> String {
        format_price(self.current_value)
    }

    pub fn bound_labels(&self) -> (String, String) {
        (
            format_price(self.config.logical_min_y),
            format_price(self.config.logical_max_y),
        )
    }
}

impl<R> PriceSource for SeriesEngine<R> {
    fn current_value(&self) -> f64 {
        self.current_value
    }
}

pub fn format_price(value: f64) -> String {
    format!("${value:.2}")
}

fn inverse_lerp(min: f64, max: f64, value: f64) -> f64 {
    if (max - min).abs() < f64::EPSILON {
        return 0.0;
    }
    ((value - min) / (max - min)).clamp(0.0, 1.0)
}

fn lerp(min: f64, max: f64, t: f64) -> f64 {
    min + (max - min) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn config(point_count: usize, min: f64, max: f64) -> SeriesConfig {
        SeriesConfig {
            point_count,
            logical_min_y: min,
            logical_max_y: max,
        }
    }

    fn engine(point_count: usize, seed: u64) -> SeriesEngine<StdRng> {
        SeriesEngine::new(
            config(point_count, 0.0, 10.0),
            Some(RenderArea::new(16.0, 8.0)),
            StdRng::seed_from_u64(seed),
        )
        .expect("valid config")
    }

    struct RecordingSurface {
        points: Vec<(f64, f64)>,
    }

    impl PolylineSink for RecordingSurface {
        fn set_polyline(&mut self, points: &[(f64, f64)]) {
            self.points = points.to_vec();
        }
    }

    #[test]
    fn starts_flat_inside_the_logical_range() {
        let engine = engine(50, 1);
        let first = engine.values()[0];
        assert_eq!(engine.values().len(), 50);
        assert!(engine.values().iter().all(|v| *v == first));
        assert!((0.0..=10.0).contains(&first));
        assert_eq!(engine.current_value(), first);
    }

    #[test]
    fn rejects_invalid_configuration() {
        let rng = StdRng::seed_from_u64(0);
        let err = SeriesEngine::new(config(1, 0.0, 10.0), None, rng.clone()).unwrap_err();
        assert_eq!(err, SeriesError::TooFewPoints(1));
        let err = SeriesEngine::new(config(10, 5.0, 5.0), None, rng.clone()).unwrap_err();
        assert!(matches!(err, SeriesError::InvalidRange { .. }));
        let err = SeriesEngine::new(config(3, -1e308, 1e308), None, rng).unwrap_err();
        assert!(matches!(err, SeriesError::InvalidRange { .. }));
    }

    #[test]
    fn length_and_bounds_hold_across_many_ticks() {
        let mut engine = engine(20, 42);
        for _ in 0..2_000 {
            engine.tick(1.0, 0.2, 10.0);
            assert_eq!(engine.values().len(), 20);
            assert!(engine.values().iter().all(|v| (0.0..=10.0).contains(v)));
        }
    }

    #[test]
    fn non_finite_amplitude_keeps_values_in_range() {
        let mut engine = engine(5, 11);
        let before = engine.values()[4];
        assert!(engine.tick(1.0, 1.0, f64::NAN));
        assert_eq!(engine.values()[4], before);
        assert!(engine.tick(1.0, 1.0, f64::INFINITY));
        assert!(engine.values().iter().all(|v| (0.0..=10.0).contains(v)));
    }

    #[test]
    fn accumulates_until_threshold() {
        let mut engine = engine(5, 3);
        // threshold = 0.05 / 0.02 = 2.5s
        assert!(!engine.tick(1.0, 0.02, 1.0));
        assert!(!engine.tick(1.0, 0.02, 1.0));
        assert!((engine.scroll_accumulator() - 2.0).abs() < 1e-12);
        assert!(engine.tick(0.5, 0.02, 1.0));
        assert_eq!(engine.scroll_accumulator(), 0.0);
    }

    #[test]
    fn long_stall_fires_only_once() {
        let mut engine = engine(5, 4);
        let before = engine.values().to_vec();
        assert!(engine.tick(1_000.0, 0.02, 1.0));
        assert_eq!(engine.values()[..3], before[1..4]);
        assert_eq!(engine.scroll_accumulator(), 0.0);
        assert!(!engine.tick(0.0, 0.02, 1.0));
    }

    #[test]
    fn non_positive_speed_never_fires() {
        let mut engine = engine(5, 5);
        assert!(!engine.tick(100.0, 0.0, 1.0));
        assert!(!engine.tick(100.0, -1.0, 1.0));
    }

    #[test]
    fn one_tick_shifts_and_appends_a_bounded_step() {
        let rng = StdRng::seed_from_u64(99);
        let mut replay = rng.clone();
        let mut engine = SeriesEngine::with_initial_value(
            config(5, 0.0, 10.0),
            Some(RenderArea::new(4.0, 2.0)),
            4.0,
            rng,
        )
        .unwrap();
        let before = engine.values().to_vec();
        let amplitude = 2.5;
        assert!(engine.tick(BASE_SCROLL_THRESHOLD, 1.0, amplitude));

        let direction: f64 = replay.random_range(-0.5..=0.5);
        let noise: f64 = replay.random_range(-1.0..=1.0) * 0.3;
        let expected = (4.0 + (direction + noise) * amplitude).clamp(0.0, 10.0);

        assert_eq!(engine.values()[..4], before[1..5]);
        assert!((engine.values()[4] - expected).abs() < 1e-12);
        assert_eq!(engine.current_value(), engine.values()[4]);
        assert!((engine.window_change() - (expected - 4.0)).abs() < 1e-12);
    }

    #[test]
    fn render_points_are_evenly_spaced() {
        let engine = engine(9, 7);
        let points = engine.render_points();
        assert_eq!(points.len(), 9);
        assert!((points[0].0 + 8.0).abs() < 1e-12);
        assert!((points[8].0 - 8.0).abs() < 1e-12);
        for pair in points.windows(2) {
            assert!((pair[1].0 - pair[0].0 - 2.0).abs() < 1e-12);
        }
        // flat start
        assert!(points.iter().all(|(_, y)| *y == points[0].1));
    }

    #[test]
    fn logical_bounds_map_to_area_edges() {
        let engine = engine(5, 8);
        assert!((engine.render_y(0.0) + 4.0).abs() < 1e-12);
        assert!((engine.render_y(10.0) - 4.0).abs() < 1e-12);
        assert!((engine.render_y(42.0) - 4.0).abs() < 1e-12);
        assert!((engine.render_y(-3.0) + 4.0).abs() < 1e-12);
    }

    #[test]
    fn render_mapping_round_trips() {
        let engine = engine(5, 9);
        for value in [0.0, 1.25, 3.3, 5.0, 9.99, 10.0] {
            let back = engine.value_for_render_y(engine.render_y(value));
            assert!((back - value).abs() < 1e-9, "{value} -> {back}");
        }
    }

    #[test]
    fn missing_or_empty_area_degrades_to_zero_geometry() {
        let rng = StdRng::seed_from_u64(10);
        let engine = SeriesEngine::new(config(4, 0.0, 10.0), None, rng.clone()).unwrap();
        assert_eq!(engine.render_area(), RenderArea::degenerate());
        assert!(engine.render_points().iter().all(|p| *p == (0.0, 0.0)));

        let engine =
            SeriesEngine::new(config(4, 0.0, 10.0), Some(RenderArea::new(-1.0, 3.0)), rng).unwrap();
        assert_eq!(engine.render_area(), RenderArea::degenerate());
        assert_eq!(engine.value_for_render_y(1.0), 0.0);
    }

    #[test]
    fn quad_scale_uses_ten_units() {
        let area = RenderArea::from_quad_scale(1.6, 0.8);
        assert!((area.width - 16.0).abs() < 1e-12);
        assert!((area.height - 8.0).abs() < 1e-12);
    }

    #[test]
    fn publishes_render_points_and_labels() {
        let engine = SeriesEngine::with_initial_value(
            config(3, 0.0, 10.0),
            Some(RenderArea::new(2.0, 2.0)),
            5.0,
            StdRng::seed_from_u64(11),
        )
        .unwrap();
        let mut surface = RecordingSurface { points: Vec::new() };
        engine.publish(&mut surface);
        assert_eq!(surface.points, vec![(-1.0, 0.0), (0.0, 0.0), (1.0, 0.0)]);
        assert_eq!(engine.price_label(), "$5.00");
        assert_eq!(
            engine.bound_labels(),
            ("$0.00".to_string(), "$10.00".to_string())
        );
    }
}
