use std::{fs, path::Path};

use chrono::{DateTime, TimeDelta, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    prelude::*,
    quantity::{power::Kilowatts, rate::KilowattHourRate},
};

#[derive(Copy, Clone, Debug, Deserialize, Serialize)]
pub struct ForecastPoint {
    pub datetime: DateTime<Utc>,
    pub generation: Kilowatts,
    pub load: Kilowatts,

    /// Grid purchase price.
    pub market: KilowattHourRate,

    /// Grid injection tariff.
    #[serde(default)]
    pub feedin: KilowattHourRate,
}

/// Chronological, evenly spaced forecast.
#[derive(Clone, Debug)]
pub struct ForecastSeries {
    points: Vec<ForecastPoint>,
    step: TimeDelta,
}

impl ForecastSeries {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read `{}`", path.display()))?;
        let points: Vec<ForecastPoint> = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse `{}`", path.display()))?;
        Self::try_from_points(points)
    }

    pub fn try_from_points(points: Vec<ForecastPoint>) -> Result<Self> {
        ensure!(points.len() >= 2, "a forecast needs at least two points");
        let step = points[1].datetime - points[0].datetime;
        ensure!(step > TimeDelta::zero(), "forecast timestamps must increase");
        if let Some((lhs, rhs)) = points
            .iter()
            .tuple_windows()
            .find(|(lhs, rhs)| rhs.datetime - lhs.datetime != step)
        {
            bail!(
                "forecast is not evenly spaced: {} is followed by {}, expected a {step} step",
                lhs.datetime,
                rhs.datetime,
            );
        }
        Ok(Self { points, step })
    }

    pub const fn step(&self) -> TimeDelta {
        self.step
    }

    pub fn first_datetime(&self) -> Option<DateTime<Utc>> {
        self.points.first().map(|point| point.datetime)
    }

    /// Replace zero prices with the last known non-zero price.
    #[must_use]
    pub fn with_filled_prices(mut self) -> Self {
        let mut last_market = None;
        let mut last_feedin = None;
        for point in &mut self.points {
            fill_forward(&mut point.market, &mut last_market);
            fill_forward(&mut point.feedin, &mut last_feedin);
        }
        self
    }

    #[must_use]
    pub fn scaled(mut self, generation_scale: f64, load_scale: f64) -> Self {
        for point in &mut self.points {
            point.generation = point.generation * generation_scale;
            point.load = point.load * load_scale;
        }
        self
    }

    /// Upsample to a finer step by repeating each point.
    pub fn resampled(self, step: TimeDelta) -> Result<Self> {
        if step == self.step {
            return Ok(self);
        }
        let native = self.step.num_seconds();
        let target = step.num_seconds();
        ensure!(
            target > 0 && target < native && native % target == 0,
            "cannot resample a {} forecast to {step}, only upsampling by a whole factor is supported",
            self.step,
        );
        let points = self
            .points
            .into_iter()
            .flat_map(|point| {
                (0..native / target).map(move |index| ForecastPoint {
                    datetime: point.datetime + TimeDelta::seconds(index * target),
                    ..point
                })
            })
            .collect_vec();
        debug!(from = %self.step, to = %step, n_points = points.len(), "resampled");
        Ok(Self { points, step })
    }

    /// Slice `[start, start + horizon)` into per-step arrays.
    pub fn window(&self, start: DateTime<Utc>, horizon: TimeDelta) -> Result<ForecastWindow> {
        let end = start + horizon;
        let points = self
            .points
            .iter()
            .filter(|point| point.datetime >= start && point.datetime < end)
            .collect_vec();
        let expected = horizon.num_seconds() / self.step.num_seconds();
        ensure!(
            i64::try_from(points.len()).is_ok_and(|len| len == expected),
            "incomplete forecast window from {start} to {end}: {} of {expected} steps",
            points.len(),
        );
        ensure!(
            points.first().is_some_and(|point| point.datetime == start),
            "forecast window does not start at {start}",
        );
        Ok(ForecastWindow {
            start,
            step: self.step,
            generation: points.iter().map(|point| point.generation).collect(),
            load: points.iter().map(|point| point.load).collect(),
            market: points.iter().map(|point| point.market).collect(),
            feed_in: points.iter().map(|point| point.feedin).collect(),
        })
    }
}

fn fill_forward(value: &mut KilowattHourRate, last: &mut Option<KilowattHourRate>) {
    if *value == KilowattHourRate::ZERO {
        if let Some(last) = last {
            *value = *last;
        }
    } else {
        *last = Some(*value);
    }
}

/// Per-step forecast arrays for one optimization window.
#[derive(Clone, Debug)]
pub struct ForecastWindow {
    pub start: DateTime<Utc>,
    pub step: TimeDelta,
    pub generation: Vec<Kilowatts>,
    pub load: Vec<Kilowatts>,
    pub market: Vec<KilowattHourRate>,
    pub feed_in: Vec<KilowattHourRate>,
}

impl ForecastWindow {
    pub const fn len(&self) -> usize {
        self.load.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.load.is_empty()
    }

    pub fn step_hours(&self) -> f64 {
        self.step.as_seconds_f64() / 3600.0
    }

    pub fn timestamp(&self, index: usize) -> DateTime<Utc> {
        self.start + self.step * i32::try_from(index).unwrap_or(i32::MAX)
    }
}


#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::{fixtures::*, *};

    #[test]
    fn test_parse_json() -> Result {
        let points: Vec<ForecastPoint> = serde_json::from_str(
            r#"[
                {"datetime": "2018-01-01T00:00:00Z", "generation": 0.5, "load": 1.0, "market": 0.2, "feedin": 0.05},
                {"datetime": "2018-01-01T01:00:00Z", "generation": 0.0, "load": 2.0, "market": 0.3}
            ]"#,
        )?;
        let series = ForecastSeries::try_from_points(points)?;
        assert_eq!(series.step(), TimeDelta::hours(1));
        assert_eq!(series.first_datetime(), Some(start()));
        Ok(())
    }

    #[test]
    fn test_uneven_spacing_is_rejected() {
        let mut points = hourly(&[1.0, 1.0, 1.0], &[0.2, 0.2, 0.2]);
        points[2].datetime += TimeDelta::minutes(30);
        assert!(ForecastSeries::try_from_points(points).is_err());
    }

    #[test]
    fn test_fill_prices() -> Result {
        let series = ForecastSeries::try_from_points(hourly(&[1.0; 4], &[0.0, 0.2, 0.0, 0.3]))?
            .with_filled_prices();
        let window = series.window(start(), TimeDelta::hours(4))?;
        let market = window.market.iter().map(|rate| rate.0).collect_vec();
        // Leading zero has nothing to fill from:
        assert_eq!(market, [0.0, 0.2, 0.2, 0.3]);
        Ok(())
    }

    #[test]
    fn test_scaled() -> Result {
        let mut points = hourly(&[2.0, 4.0], &[0.2, 0.2]);
        points[0].generation = Kilowatts::from(1.0);
        let window = ForecastSeries::try_from_points(points)?
            .scaled(3.0, 0.5)
            .window(start(), TimeDelta::hours(2))?;
        assert_abs_diff_eq!(window.generation[0].0, 3.0);
        assert_abs_diff_eq!(window.load[1].0, 2.0);
        Ok(())
    }

    #[test]
    fn test_upsample() -> Result {
        let series = ForecastSeries::try_from_points(hourly(&[1.0, 2.0], &[0.1, 0.2]))?
            .resampled(TimeDelta::minutes(15))?;
        assert_eq!(series.step(), TimeDelta::minutes(15));
        let window = series.window(start(), TimeDelta::hours(2))?;
        assert_eq!(window.len(), 8);
        assert_abs_diff_eq!(window.load[3].0, 1.0);
        assert_abs_diff_eq!(window.load[4].0, 2.0);
        assert_eq!(window.timestamp(5), start() + TimeDelta::minutes(75));
        Ok(())
    }

    #[test]
    fn test_downsample_is_rejected() -> Result {
        let series = ForecastSeries::try_from_points(hourly(&[1.0, 2.0], &[0.1, 0.2]))?;
        assert!(series.resampled(TimeDelta::minutes(90)).is_err());
        Ok(())
    }

    #[test]
    fn test_window() -> Result {
        let series = ForecastSeries::try_from_points(hourly(&[1.0; 48], &[0.2; 48]))?;
        let window = series.window(start() + TimeDelta::hours(24), TimeDelta::hours(24))?;
        assert_eq!(window.len(), 24);
        assert_abs_diff_eq!(window.step_hours(), 1.0);
        Ok(())
    }

    #[test]
    fn test_incomplete_window() -> Result {
        let series = ForecastSeries::try_from_points(hourly(&[1.0; 30], &[0.2; 30]))?;
        assert!(series.window(start() + TimeDelta::hours(24), TimeDelta::hours(24)).is_err());
        Ok(())
    }
}
