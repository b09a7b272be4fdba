use std::fs::File;
use std::io::Read;

use anyhow::{Result, bail};
use baselinexr_core::{
    AdjustmentStore, EstimatorKind, FlightMode, LocationFix, MotionEstimator, Session,
    SharedSession,
};
use csv::Reader;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{debug, info, warn};
use serde::Deserialize;

use crate::adjustments::TomlAdjustmentStore;
use crate::args::ReplayCli;
use crate::config::load_session_config;

/// How long rendering continues after the last fix of the log.
const TAIL_MS: i64 = 5000;

#[derive(Deserialize)]
struct CsvRecord {
    t_ms: i64,
    lat: f64,
    lon: f64,
    alt: f64,
    vn: f64,
    ve: f64,
    climb: f64,
    #[serde(default)]
    h_acc: Option<f64>,
    #[serde(default)]
    v_acc: Option<f64>,
}

impl From<CsvRecord> for LocationFix {
    fn from(r: CsvRecord) -> Self {
        LocationFix {
            horizontal_accuracy: r.h_acc,
            vertical_accuracy: r.v_acc,
            ..LocationFix::new(r.t_ms, r.lat, r.lon, r.alt, r.vn, r.ve, r.climb)
        }
    }
}

pub fn read_fixes<R: Read>(reader: R) -> Result<Vec<LocationFix>> {
    let mut reader = Reader::from_reader(reader);
    let mut fixes = Vec::new();
    for row in reader.deserialize::<CsvRecord>() {
        fixes.push(row?.into());
    }
    Ok(fixes)
}

#[derive(Debug, Default)]
pub struct ReplaySummary {
    pub fixes: usize,
    pub rejected: usize,
    pub frames: usize,
    /// `(timestamp_ms, mode)` for every mode change
    pub transitions: Vec<(i64, FlightMode)>,
    pub final_mode: FlightMode,
    /// largest distance the scene was shifted between two fixes
    pub max_render_drift_m: f64,
}

impl ReplaySummary {
    fn log(&self) {
        info!(
            "{} fixes ({} rejected), {} frames rendered",
            self.fixes, self.rejected, self.frames
        );
        for (t_ms, mode) in self.transitions.iter() {
            info!("  {:>10}ms  {}", t_ms, mode);
        }
        info!("final mode {}", self.final_mode);
        info!("max render drift {:.2}m", self.max_render_drift_m);
    }
}

/// Feeds `fixes` into `shared` and renders at `render_hz` in between, the way
/// the headset would.
pub fn replay<E: MotionEstimator + Clone>(
    shared: &SharedSession<CriticalSectionRawMutex, E>,
    fixes: &[LocationFix],
    render_hz: f64,
) -> ReplaySummary {
    let frame_ms = ((1000.0 / render_hz).round() as i64).max(1);
    let mut summary = ReplaySummary {
        fixes: fixes.len(),
        ..Default::default()
    };
    let mut mode = shared.mode();

    for (i, fix) in fixes.iter().enumerate() {
        let revision = shared.read(|s| s.estimator().revision());
        let next_mode = shared.ingest(fix);
        if shared.read(|s| s.estimator().revision()) == revision {
            warn!("fix {} at {}ms rejected", i, fix.timestamp_ms);
            summary.rejected += 1;
            continue;
        }
        if next_mode != mode {
            summary.transitions.push((fix.timestamp_ms, next_mode));
            mode = next_mode;
        }

        let until_ms = fixes
            .get(i + 1)
            .map(|next| next.timestamp_ms)
            .filter(|&t| t > fix.timestamp_ms)
            .unwrap_or(fix.timestamp_ms + TAIL_MS);
        let mut now_ms = fix.timestamp_ms;
        while now_ms < until_ms {
            // the fix's own position, wherever the scene has moved it to
            let local = shared.to_local(fix.lat, fix.lon, fix.alt, now_ms);
            summary.max_render_drift_m = summary.max_render_drift_m.max(local.norm());
            summary.frames += 1;
            now_ms += frame_ms;
        }
        debug!(
            "{}ms {} predicted velocity {:?}",
            fix.timestamp_ms,
            mode,
            shared.predict(fix.timestamp_ms).velocity
        );
    }

    summary.final_mode = shared.mode();
    summary
}

pub fn run(args: ReplayCli, store: &mut TomlAdjustmentStore) -> Result<()> {
    if args.render_hz.is_nan() || args.render_hz <= 0.0 {
        bail!("render rate must be positive, got {}", args.render_hz);
    }

    let mut config = load_session_config(args.config.as_deref())?;
    if let Some(estimator) = args.estimator {
        config.estimator = estimator.into();
    }
    let adjustment = store.load()?.unwrap_or_default();

    let fixes = read_fixes(File::open(&args.fix_log)?)?;
    info!(
        "replaying {} fixes from {:?} with the {:?} estimator",
        fixes.len(),
        args.fix_log,
        config.estimator
    );

    let summary = match config.estimator {
        EstimatorKind::Kalman => replay(
            &SharedSession::new(Session::kalman(&config, adjustment)),
            &fixes,
            args.render_hz,
        ),
        EstimatorKind::Simple => replay(
            &SharedSession::new(Session::simple(&config, adjustment)),
            &fixes,
            args.render_hz,
        ),
    };
    summary.log();
    Ok(())
}
