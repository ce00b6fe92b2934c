//! Measurement-session orchestration: sweep and concurrent acquisition
//! (spec §4.5).

mod token;

pub use token::CancellationToken;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::error::{LabError, LabResult, SessionErrorKind};
use crate::measurement::Frame;
use crate::metadata::ExperimentMetadata;

/// A sweep-parameter value (spec §4.5 step 1).
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Number(f64),
    Text(String),
}

/// A value an acquisition callable contributes for one key (spec §4.5
/// step 3's "sentinel null" for missing keys).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionValue {
    Number(f64),
    Text(String),
    Null,
}

/// Parameter values in scope for one sweep point, keyed by declared name.
pub type AcquisitionContext = HashMap<String, ParamValue>;

/// One registered acquisition callable (spec §4.5): invoked with the
/// current sweep context, returns a disjoint key -> value mapping.
pub type AcquisitionFn =
    dyn Fn(&AcquisitionContext) -> BoxFuture<'static, LabResult<HashMap<String, SessionValue>>> + Send + Sync;

/// One registered background task (spec §4.5 concurrent mode): runs for
/// the session's duration, cooperatively checking its cancellation token.
pub type BackgroundTaskFn = dyn Fn(CancellationToken) -> BoxFuture<'static, LabResult<()>> + Send + Sync;

/// A session's output: an optional metadata header plus the acquired frame
/// (spec §4.5 "Session output is an Experiment").
#[derive(Debug, Clone, Default)]
pub struct Experiment {
    /// Random v4 id allocated once per run, for correlating this
    /// experiment's stored artifacts and audit entries.
    pub run_id: String,
    pub metadata: Option<ExperimentMetadata>,
    pub frame: Frame,
}

/// Builder and driver for one measurement run (spec §4.5). Parameters,
/// acquisitions, and background tasks are registered in declared order;
/// `run_sweep`/`run_concurrent` pick the mode.
pub struct MeasurementSession {
    metadata: Option<ExperimentMetadata>,
    parameters: Vec<(String, Vec<ParamValue>)>,
    acquisitions: Vec<(String, Arc<AcquisitionFn>)>,
    background_tasks: Vec<(String, Arc<BackgroundTaskFn>)>,
    task_grace: Duration,
}

impl Default for MeasurementSession {
    fn default() -> Self {
        Self {
            metadata: None,
            parameters: Vec::new(),
            acquisitions: Vec::new(),
            background_tasks: Vec::new(),
            task_grace: Duration::from_secs(2),
        }
    }
}

impl MeasurementSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task_grace(mut self, grace: Duration) -> Self {
        self.task_grace = grace;
        self
    }

    pub fn metadata(mut self, metadata: ExperimentMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, values: Vec<ParamValue>) -> Self {
        self.parameters.push((name.into(), values));
        self
    }

    pub fn acquisition(mut self, name: impl Into<String>, callable: Arc<AcquisitionFn>) -> Self {
        self.acquisitions.push((name.into(), callable));
        self
    }

    pub fn background_task(mut self, name: impl Into<String>, task: Arc<BackgroundTaskFn>) -> Self {
        self.background_tasks.push((name.into(), task));
        self
    }

    /// Cartesian product of the declared parameters, outermost = first
    /// declared, invoking every registered acquisition at each point and
    /// appending one row per point (spec §4.5 "Sweep mode").
    pub async fn run_sweep(&self) -> LabResult<Experiment> {
        let combos = cartesian_product(&self.parameters);
        let mut frame = Frame::new();

        for combo in &combos {
            let context: AcquisitionContext = combo.iter().cloned().collect();

            let mut row_values: HashMap<String, SessionValue> = HashMap::new();
            let mut keys_this_point = HashSet::new();
            for (_, acquisition) in &self.acquisitions {
                let result = acquisition(&context).await?;
                for key in result.keys() {
                    if !keys_this_point.insert(key.clone()) {
                        return Err(LabError::Session(SessionErrorKind::AcquisitionKeyConflict(key.clone())));
                    }
                }
                row_values.extend(result);
            }

            // A point that omits a key some other point supplied is not a
            // conflict: the column still exists (from whichever point
            // created it) and this row's cell is simply left null (spec
            // §4.5 step 3). Columns must exist before the row is padded in, so a
            // freshly created column back-fills to the row count that
            // precedes this row rather than including it twice.
            for (name, value) in combo {
                match value {
                    ParamValue::Number(_) => {
                        frame.ensure_numeric_column(name, None);
                    }
                    ParamValue::Text(_) => {
                        frame.ensure_string_column(name);
                    }
                }
            }
            for key in &keys_this_point {
                match &row_values[key] {
                    SessionValue::Number(_) => {
                        frame.ensure_numeric_column(key, None);
                    }
                    SessionValue::Text(_) => {
                        frame.ensure_string_column(key);
                    }
                    SessionValue::Null => {}
                }
            }

            frame.pad_row();
            let row = frame.row_count() - 1;

            for (name, value) in combo {
                match value {
                    ParamValue::Number(n) => {
                        let idx = frame.ensure_numeric_column(name, None);
                        frame.set_numeric(idx, row, *n);
                    }
                    ParamValue::Text(t) => {
                        let idx = frame.ensure_string_column(name);
                        frame.set_string(idx, row, t.clone());
                    }
                }
            }
            for key in &keys_this_point {
                match &row_values[key] {
                    SessionValue::Number(n) => {
                        let idx = frame.ensure_numeric_column(key, None);
                        frame.set_numeric(idx, row, *n);
                    }
                    SessionValue::Text(t) => {
                        let idx = frame.ensure_string_column(key);
                        frame.set_string(idx, row, t.clone());
                    }
                    SessionValue::Null => {}
                }
            }
        }

        Ok(Experiment { run_id: uuid::Uuid::new_v4().to_string(), metadata: self.metadata.clone(), frame })
    }

    /// Tick every `interval` up to `duration`, running background tasks
    /// concurrently with the acquisition loop (spec §4.5 "Concurrent
    /// mode"). A tick that runs behind schedule is logged, not dropped;
    /// its lateness is recorded in the `skew` column (spec §8 property 7).
    pub async fn run_concurrent(&self, duration: Duration, interval: Duration) -> LabResult<Experiment> {
        let token = CancellationToken::new();
        let start = Instant::now();

        let mut task_handles = Vec::with_capacity(self.background_tasks.len());
        for (name, task) in &self.background_tasks {
            let token = token.clone();
            let task = task.clone();
            let handle = tokio::spawn(async move { task(token).await });
            task_handles.push((name.clone(), handle));
        }

        let mut frame = Frame::new();
        let mut tick_index: u64 = 0;

        loop {
            let target = interval.mul_f64(tick_index as f64);
            if target >= duration {
                break;
            }

            let now = start.elapsed();
            if target > now {
                tokio::time::sleep(target - now).await;
            } else if now > target {
                tracing::warn!(
                    tick_index,
                    behind_by_secs = (now - target).as_secs_f64(),
                    "acquisition tick running behind schedule"
                );
            }

            let tick_wall = Utc::now();
            let tick_monotonic = start.elapsed().as_secs_f64();
            let skew = tick_monotonic - target.as_secs_f64();

            let context = AcquisitionContext::new();
            let mut row_values: HashMap<String, SessionValue> = HashMap::new();
            for (_, acquisition) in &self.acquisitions {
                if token.is_cancelled() {
                    return Err(LabError::Session(SessionErrorKind::Cancelled));
                }
                let result = acquisition(&context).await?;
                row_values.extend(result);
            }

            frame.ensure_numeric_column("monotonic", Some("s".to_string()));
            frame.ensure_numeric_column("skew", Some("s".to_string()));
            frame.ensure_string_column("wall_clock");
            for (key, value) in &row_values {
                match value {
                    SessionValue::Number(_) => {
                        frame.ensure_numeric_column(key, None);
                    }
                    SessionValue::Text(_) => {
                        frame.ensure_string_column(key);
                    }
                    SessionValue::Null => {}
                }
            }

            frame.pad_row();
            let row = frame.row_count() - 1;

            let monotonic_idx = frame.ensure_numeric_column("monotonic", Some("s".to_string()));
            frame.set_numeric(monotonic_idx, row, tick_monotonic);
            let skew_idx = frame.ensure_numeric_column("skew", Some("s".to_string()));
            frame.set_numeric(skew_idx, row, skew);
            let wall_idx = frame.ensure_string_column("wall_clock");
            frame.set_string(wall_idx, row, tick_wall.to_rfc3339());

            for (key, value) in &row_values {
                match value {
                    SessionValue::Number(n) => {
                        let idx = frame.ensure_numeric_column(key, None);
                        frame.set_numeric(idx, row, *n);
                    }
                    SessionValue::Text(t) => {
                        let idx = frame.ensure_string_column(key);
                        frame.set_string(idx, row, t.clone());
                    }
                    SessionValue::Null => {}
                }
            }

            tick_index += 1;
        }

        token.cancel();

        let mut abandoned = Vec::new();
        for (name, handle) in task_handles {
            let abort_handle = handle.abort_handle();
            match tokio::time::timeout(self.task_grace, handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => return Err(e),
                Ok(Err(_join_err)) => abandoned.push(name),
                Err(_elapsed) => {
                    abort_handle.abort();
                    abandoned.push(name);
                }
            }
        }

        if !abandoned.is_empty() {
            return Err(LabError::Session(SessionErrorKind::TaskAbandoned(abandoned.join(", "))));
        }

        Ok(Experiment { run_id: uuid::Uuid::new_v4().to_string(), metadata: self.metadata.clone(), frame })
    }
}

/// Build the Cartesian product of declared parameters, first-declared
/// slowest-changing (spec §4.5: "outermost = first declared").
fn cartesian_product(params: &[(String, Vec<ParamValue>)]) -> Vec<Vec<(String, ParamValue)>> {
    let mut combos: Vec<Vec<(String, ParamValue)>> = vec![Vec::new()];
    for (name, values) in params {
        let mut next = Vec::with_capacity(combos.len() * values.len().max(1));
        for combo in &combos {
            for value in values {
                let mut extended = combo.clone();
                extended.push((name.clone(), value.clone()));
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::ColumnValues;

    fn number_acquisition(key: &'static str, value: f64) -> Arc<AcquisitionFn> {
        Arc::new(move |_ctx: &AcquisitionContext| {
            Box::pin(async move {
                let mut out = HashMap::new();
                out.insert(key.to_string(), SessionValue::Number(value));
                Ok(out)
            })
        })
    }

    #[tokio::test]
    async fn sweep_produces_one_row_per_cartesian_point() {
        let session = MeasurementSession::new()
            .parameter("voltage", vec![ParamValue::Number(1.0), ParamValue::Number(2.0)])
            .parameter("gain", vec![ParamValue::Number(10.0)])
            .acquisition("reading", number_acquisition("current", 0.5));

        let experiment = session.run_sweep().await.unwrap();
        assert_eq!(experiment.frame.row_count(), 2);
        assert!(experiment.frame.column("voltage").is_some());
        assert!(experiment.frame.column("gain").is_some());
        assert!(experiment.frame.column("current").is_some());
    }

    #[tokio::test]
    async fn sweep_fails_on_overlapping_acquisition_keys() {
        let session = MeasurementSession::new()
            .parameter("voltage", vec![ParamValue::Number(1.0)])
            .acquisition("a", number_acquisition("value", 1.0))
            .acquisition("b", number_acquisition("value", 2.0));

        let err = session.run_sweep().await.unwrap_err();
        assert!(matches!(err, LabError::Session(SessionErrorKind::AcquisitionKeyConflict(_))));
    }

    fn flaky_acquisition() -> Arc<AcquisitionFn> {
        Arc::new(|ctx: &AcquisitionContext| {
            let present = matches!(ctx.get("voltage"), Some(ParamValue::Number(v)) if *v == 1.0);
            Box::pin(async move {
                let mut out = HashMap::new();
                if present {
                    out.insert("reading".to_string(), SessionValue::Number(9.0));
                }
                Ok(out)
            })
        })
    }

    #[tokio::test]
    async fn sweep_null_fills_a_key_missing_at_some_points() {
        let session = MeasurementSession::new()
            .parameter("voltage", vec![ParamValue::Number(1.0), ParamValue::Number(2.0)])
            .acquisition("flaky", flaky_acquisition());

        let experiment = session.run_sweep().await.unwrap();
        assert_eq!(experiment.frame.row_count(), 2);
        let column = experiment.frame.column("reading").unwrap();
        match &column.values {
            ColumnValues::Numbers(values) => {
                assert_eq!(values[0], Some(9.0));
                assert_eq!(values[1], None);
            }
            ColumnValues::Strings(_) => panic!("expected a numeric column"),
        }
    }

    #[tokio::test]
    async fn concurrent_mode_ticks_until_duration_elapses() {
        let session = MeasurementSession::new().acquisition("reading", number_acquisition("current", 0.5));

        let experiment = session
            .run_concurrent(Duration::from_millis(45), Duration::from_millis(15))
            .await
            .unwrap();

        assert!(experiment.frame.row_count() >= 2);
        assert!(experiment.frame.column("skew").is_some());
        assert!(experiment.frame.column("monotonic").is_some());
    }

    #[tokio::test]
    async fn concurrent_mode_reports_abandoned_tasks_past_grace_period() {
        let session = MeasurementSession::new()
            .with_task_grace(Duration::from_millis(10))
            .background_task(
                "stubborn",
                Arc::new(|token: CancellationToken| {
                    Box::pin(async move {
                        while !token.is_cancelled() {
                            tokio::time::sleep(Duration::from_millis(5)).await;
                        }
                        // Ignore cancellation and keep running past the grace period.
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok(())
                    })
                }),
            );

        let err = session
            .run_concurrent(Duration::from_millis(20), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, LabError::Session(SessionErrorKind::TaskAbandoned(_))));
    }
}
