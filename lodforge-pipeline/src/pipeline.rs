//! LOD job orchestration
//!
//! A job runs validate, weld, simplify, attributes, unwrap and bake in that
//! order. Optional stages are skipped entirely. Cancellation is checked
//! before every stage and inside the simplification and bake loops; a
//! cancelled job reports the stage it stopped in instead of failing.

use crate::config::LodJobConfig;
use crate::host::{MeshSource, ResultSink};
use crate::progress::{JobEvent, JobOutcome, ProgressListener, Stage};
use lodforge_bake::{BakeResult, MaterialBaker};
use lodforge_core::{recalculate_normals, recalculate_tangents, CancelToken, Error, Mesh, Result};
use lodforge_simplification::{
    weld_vertices, EdgeCollapseSimplifier, MeshSimplifier, SimplifyReport, WeldReport,
};
use lodforge_unwrap::{build_atlas, AtlasLayout};
use rayon::ThreadPool;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Wall clock time spent in each stage that ran
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageTimings {
    entries: Vec<(Stage, Duration)>,
}

impl StageTimings {
    pub fn record(&mut self, stage: Stage, elapsed: Duration) {
        self.entries.push((stage, elapsed));
    }

    pub fn get(&self, stage: Stage) -> Option<Duration> {
        self.entries.iter().find(|(s, _)| *s == stage).map(|(_, d)| *d)
    }

    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.entries.iter().map(|(s, _)| *s)
    }

    pub fn total(&self) -> Duration {
        self.entries.iter().map(|(_, d)| *d).sum()
    }
}

/// Everything a completed job produced
#[derive(Debug, Clone)]
pub struct JobOutput {
    /// Simplified mesh carrying the atlas UV channel
    pub mesh: Mesh,
    pub atlas: AtlasLayout,
    pub bake: BakeResult,
    pub simplify_report: SimplifyReport,
    /// Present when the welding pre-pass ran
    pub weld_report: Option<WeldReport>,
    pub timings: StageTimings,
}

/// Result of a job that did not fail
#[derive(Debug)]
pub enum JobStatus {
    Completed(Box<JobOutput>),
    /// Stopped by its cancel token during `stage`; nothing was produced
    Cancelled { stage: Stage },
}

impl JobStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobStatus::Completed(_))
    }

    pub fn output(&self) -> Option<&JobOutput> {
        match self {
            JobStatus::Completed(output) => Some(output),
            JobStatus::Cancelled { .. } => None,
        }
    }

    pub fn into_output(self) -> Option<JobOutput> {
        match self {
            JobStatus::Completed(output) => Some(*output),
            JobStatus::Cancelled { .. } => None,
        }
    }
}

/// Runs stages, reporting events and timings, and remembers the current stage
struct StageRunner<'a> {
    listener: &'a dyn ProgressListener,
    cancel: &'a CancelToken,
    current: Stage,
    timings: StageTimings,
}

impl<'a> StageRunner<'a> {
    fn run<T>(&mut self, stage: Stage, op: impl FnOnce() -> Result<T>) -> Result<T> {
        self.current = stage;
        self.cancel.check()?;
        self.listener.on_event(&JobEvent::StageStarted { stage });
        let start = Instant::now();
        let value = op()?;
        let elapsed = start.elapsed();
        self.timings.record(stage, elapsed);
        self.listener.on_event(&JobEvent::StageCompleted { stage, elapsed });
        info!(%stage, elapsed_ms = elapsed.as_secs_f64() * 1000.0, "stage completed");
        Ok(value)
    }
}

/// LOD job orchestrator
pub struct LodPipeline {
    config: LodJobConfig,
    pool: ThreadPool,
}

impl LodPipeline {
    /// Validate `config` and set up its worker pool
    pub fn new(config: LodJobConfig) -> Result<Self> {
        config.validate()?;
        let pool = config.threads.build_pool()?;
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &LodJobConfig {
        &self.config
    }

    /// Number of workers the job stages run on
    pub fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run one job over `mesh`.
    ///
    /// Cancellation yields `Ok(JobStatus::Cancelled)`; any other failure is
    /// returned as an error and no partial output is exposed.
    pub fn run(
        &self,
        mesh: &Mesh,
        listener: &dyn ProgressListener,
        cancel: &CancelToken,
    ) -> Result<JobStatus> {
        let mut runner = StageRunner {
            listener,
            cancel,
            current: Stage::Validate,
            timings: StageTimings::default(),
        };
        let result = self.pool.install(|| self.execute(mesh, &mut runner));

        match result {
            Ok(output) => {
                info!(
                    triangles = output.mesh.triangle_count(),
                    total_ms = output.timings.total().as_secs_f64() * 1000.0,
                    "LOD job completed"
                );
                listener.on_event(&JobEvent::JobFinished {
                    outcome: JobOutcome::Completed,
                });
                Ok(JobStatus::Completed(Box::new(output)))
            }
            Err(Error::Cancelled) => {
                let stage = runner.current;
                info!(%stage, "LOD job cancelled");
                listener.on_event(&JobEvent::JobFinished {
                    outcome: JobOutcome::Cancelled { stage },
                });
                Ok(JobStatus::Cancelled { stage })
            }
            Err(e) => {
                let stage = runner.current;
                warn!(%stage, error = %e, "LOD job failed");
                listener.on_event(&JobEvent::JobFinished {
                    outcome: JobOutcome::Failed {
                        stage,
                        message: e.to_string(),
                    },
                });
                Err(e)
            }
        }
    }

    /// Load the input from `source`, run the job and hand the output to `sink`
    pub fn run_from_source(
        &self,
        source: &dyn MeshSource,
        sink: &mut dyn ResultSink,
        listener: &dyn ProgressListener,
        cancel: &CancelToken,
    ) -> Result<JobStatus> {
        let mesh = source.load_mesh()?;
        let status = self.run(&mesh, listener, cancel)?;
        if let Some(output) = status.output() {
            sink.accept(output)?;
        }
        Ok(status)
    }

    fn execute(&self, mesh: &Mesh, runner: &mut StageRunner<'_>) -> Result<JobOutput> {
        let config = &self.config;
        let cancel = runner.cancel;

        runner.run(Stage::Validate, || self.validate_input(mesh))?;

        let mut weld_report = None;
        let welded;
        let input = if config.welding_threshold > 0.0 {
            let (welded_mesh, report) = runner.run(Stage::Weld, || {
                let mut copy = mesh.clone();
                let report = weld_vertices(&mut copy, config.welding_threshold);
                Ok((copy, report))
            })?;
            weld_report = Some(report);
            welded = welded_mesh;
            &welded
        } else {
            mesh
        };

        let simplified = runner.run(Stage::Simplify, || {
            let mut options = config.simplify_options()?;
            if let Some(report) = &weld_report {
                // locked regions index the caller's mesh, not the welded copy
                options.locked_regions = config
                    .locked_regions
                    .iter()
                    .map(|region| report.remap_triangles(region))
                    .collect();
                if report.degenerate_triangles > 0 && !config.locked_regions.is_empty() {
                    debug!(
                        dropped = report.degenerate_triangles,
                        "remapped locked regions onto the welded mesh"
                    );
                }
            }
            EdgeCollapseSimplifier::new(options).simplify(input, cancel)
        })?;
        let simplify_report = simplified.report;
        let mut lod = simplified.mesh;

        if config.recalculate_normals {
            runner.run(Stage::Attributes, || {
                recalculate_normals(&mut lod, config.hard_angle_degrees);
                Ok(())
            })?;
        }

        let (lod, atlas) = runner.run(Stage::Unwrap, || {
            let (mut out, layout) = build_atlas(&lod, &config.atlas_options(), cancel)?.into_parts();
            recalculate_tangents(&mut out, config.output_uv_channel)?;
            Ok((out, layout))
        })?;

        // the bake samples the untouched input, not the welded copy
        let bake = runner.run(Stage::Bake, || {
            MaterialBaker::new(mesh)?.bake(&lod, &config.bake_options(), cancel)
        })?;

        Ok(JobOutput {
            mesh: lod,
            atlas,
            bake,
            simplify_report,
            weld_report,
            timings: std::mem::take(&mut runner.timings),
        })
    }

    fn validate_input(&self, mesh: &Mesh) -> Result<()> {
        mesh.validate()?;
        if mesh.is_empty() {
            return Err(Error::InvalidInput("mesh has no triangles".to_string()));
        }
        let triangles = mesh.triangle_count();
        if let Some(&bad) = self.config.locked_regions.iter().flatten().find(|&&t| t >= triangles) {
            return Err(Error::InvalidConfig(format!(
                "locked region references triangle {} but the mesh has {}",
                bad, triangles
            )));
        }
        let channels = mesh.uv_channel_count();
        if self.config.output_uv_channel > channels {
            return Err(Error::InvalidConfig(format!(
                "output UV channel {} would leave a gap after {} existing channels",
                self.config.output_uv_channel, channels
            )));
        }
        let textured = mesh.material_slots.iter().any(|slot| slot.has_textures());
        if textured && self.config.source_uv_channel >= channels {
            return Err(Error::InvalidConfig(format!(
                "mesh is textured but has no UV channel {}",
                self.config.source_uv_channel
            )));
        }
        Ok(())
    }
}

/// Run a single job with no progress reporting and no cancellation
pub fn run(mesh: &Mesh, config: LodJobConfig) -> Result<JobStatus> {
    LodPipeline::new(config)?.run(mesh, &crate::progress::NoProgress, &CancelToken::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodforge_core::{Point2f, Point3f, Triangle, Vertex};
    use std::sync::Mutex;

    /// Flat grid with UVs matching its XY coordinates
    fn make_grid(size: usize) -> Mesh {
        let mut vertices = Vec::new();
        for y in 0..=size {
            for x in 0..=size {
                let (u, v) = (x as f32 / size as f32, y as f32 / size as f32);
                vertices.push(Vertex::new(Point3f::new(u, v, 0.0)).with_uv(Point2f::new(u, v)));
            }
        }
        let row = size + 1;
        let mut triangles = Vec::new();
        for y in 0..size {
            for x in 0..size {
                let a = y * row + x;
                triangles.push(Triangle::new([a, a + 1, a + row + 1], 0));
                triangles.push(Triangle::new([a, a + row + 1, a + row], 0));
            }
        }
        Mesh::from_parts(vertices, triangles, vec![Default::default()])
    }

    fn small_config() -> LodJobConfig {
        LodJobConfig::default()
            .with_target_triangle_ratio(0.5)
            .with_atlas_resolution(32)
            .with_super_sampling_rate(1)
    }

    #[test]
    fn test_stage_events_in_order() {
        let events = Mutex::new(Vec::new());
        let listener = |event: &JobEvent| {
            if let JobEvent::StageStarted { stage } = event {
                events.lock().unwrap().push(*stage);
            }
        };
        let pipeline = LodPipeline::new(small_config().with_recalculate_normals(true)).unwrap();
        let status = pipeline.run(&make_grid(4), &listener, &CancelToken::new()).unwrap();
        assert!(status.is_completed());
        assert_eq!(
            events.into_inner().unwrap(),
            vec![Stage::Validate, Stage::Simplify, Stage::Attributes, Stage::Unwrap, Stage::Bake]
        );

        let output = status.into_output().unwrap();
        assert!(output.weld_report.is_none());
        assert_eq!(
            output.timings.stages().collect::<Vec<_>>(),
            vec![Stage::Validate, Stage::Simplify, Stage::Attributes, Stage::Unwrap, Stage::Bake]
        );
    }

    #[test]
    fn test_weld_stage_runs_when_enabled() {
        let config = small_config().with_welding_threshold(1e-4);
        let status = run(&make_grid(4), config).unwrap();
        let output = status.into_output().unwrap();
        assert!(output.weld_report.is_some());
        assert!(output.timings.get(Stage::Weld).is_some());
    }

    #[test]
    fn test_locked_regions_follow_welding() {
        // a sliver in front of the grid collapses when welded, shifting every index
        let mut mesh = make_grid(4);
        mesh.vertices.push(Vertex::new(Point3f::new(0.00001, 0.0, 0.0)).with_uv(Point2f::new(0.0, 0.0)));
        let sliver = mesh.vertices.len() - 1;
        mesh.triangles.insert(0, Triangle::new([0, sliver, 1], 0));
        let locked_input = 9;
        let locked_positions = {
            let mut p: Vec<[i64; 3]> = mesh
                .triangle_positions(locked_input)
                .iter()
                .map(|v| [(v.x * 1e4).round() as i64, (v.y * 1e4).round() as i64, 0])
                .collect();
            p.sort_unstable();
            p
        };

        let config = small_config()
            .with_welding_threshold(1e-3)
            .with_locked_regions(vec![vec![locked_input]]);
        let output = run(&mesh, config).unwrap().into_output().unwrap();
        let weld = output.weld_report.as_ref().unwrap();
        assert_eq!(weld.degenerate_triangles, 1);
        assert_eq!(weld.triangle_map[locked_input], Some(locked_input - 1));

        let found = (0..output.mesh.triangle_count()).any(|t| {
            let mut p: Vec<[i64; 3]> = output
                .mesh
                .triangle_positions(t)
                .iter()
                .map(|v| [(v.x * 1e4).round() as i64, (v.y * 1e4).round() as i64, 0])
                .collect();
            p.sort_unstable();
            p == locked_positions
        });
        assert!(found, "locked triangle did not survive simplification");
    }

    #[test]
    fn test_locked_region_out_of_range_is_rejected() {
        let config = small_config().with_locked_regions(vec![vec![500]]);
        let result = run(&make_grid(2), config);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_cancel_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let pipeline = LodPipeline::new(small_config()).unwrap();
        let status = pipeline.run(&make_grid(2), &crate::progress::NoProgress, &cancel).unwrap();
        assert!(matches!(status, JobStatus::Cancelled { stage: Stage::Validate }));
    }

    #[test]
    fn test_invalid_input_fails_in_validate() {
        let mut mesh = make_grid(2);
        mesh.triangles[0].indices[0] = 999;
        let outcome = Mutex::new(None);
        let listener = |event: &JobEvent| {
            if let JobEvent::JobFinished { outcome: o } = event {
                *outcome.lock().unwrap() = Some(o.clone());
            }
        };
        let pipeline = LodPipeline::new(small_config()).unwrap();
        let result = pipeline.run(&mesh, &listener, &CancelToken::new());
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(matches!(
            outcome.into_inner().unwrap(),
            Some(JobOutcome::Failed { stage: Stage::Validate, .. })
        ));
    }

    #[test]
    fn test_empty_mesh_is_rejected() {
        let result = run(&Mesh::new(), small_config());
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_output_channel_gap_is_rejected() {
        let config = small_config().with_output_uv_channel(3);
        assert!(matches!(run(&make_grid(2), config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_timings() {
        let mut timings = StageTimings::default();
        timings.record(Stage::Simplify, Duration::from_millis(5));
        timings.record(Stage::Bake, Duration::from_millis(7));
        assert_eq!(timings.get(Stage::Bake), Some(Duration::from_millis(7)));
        assert_eq!(timings.get(Stage::Weld), None);
        assert_eq!(timings.total(), Duration::from_millis(12));
    }
}
