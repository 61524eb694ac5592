//! Output files for a sweep: raw and aggregated CSV, survival records,
//! log-rank and metadata JSON, and optional field snapshots.

use super::aggregate::{GroupAggregate, METRICS};
use crate::config::Config;
use crate::error::Result;
use crate::run::RunSummary;
use crate::sweep::{Job, JobResult};
use crate::world::FieldSnapshot;
use chrono::Utc;
use ndarray::Array2;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Attached to every JSON artifact
const PROXY_NOTE: &str = "All sigma quantities are dissipation proxies \
(diffusive flux and behavioral expenditure divided by the bath temperature), \
not thermodynamic entropy production.";

const LOGRANK_NOTE: &str = "Log-rank statistics are supplementary; the primary \
survival comparison is the paired bootstrap interval on the RMST difference.";

/// Paths written by `export_all`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExportManifest {
    pub raw: PathBuf,
    pub agg: PathBuf,
    pub survival: PathBuf,
    pub logrank: PathBuf,
    pub meta: PathBuf,
    pub snapshot_dirs: Vec<PathBuf>,
}

/// Export system for sweep artifacts
pub struct ExportSystem;

fn opt(value: Option<f64>) -> String {
    value.map_or_else(String::new, |v| v.to_string())
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path)?))
}

impl ExportSystem {
    /// Write every artifact into `dir`, creating it if needed
    pub fn export_all<P: AsRef<Path>>(
        dir: P,
        results: &[JobResult],
        aggregates: &[GroupAggregate],
        config: &Config,
        workers: usize,
    ) -> Result<ExportManifest> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let manifest = ExportManifest {
            raw: dir.join("raw.csv"),
            agg: dir.join("agg.csv"),
            survival: dir.join("survival.csv"),
            logrank: dir.join("logrank.json"),
            meta: dir.join("meta.json"),
            snapshot_dirs: Self::export_snapshots(dir.join("snapshots"), results)?,
        };

        Self::export_raw_csv(results, config.sim.max_agents, &manifest.raw)?;
        Self::export_agg_csv(aggregates, &manifest.agg)?;
        Self::export_survival_csv(results, &manifest.survival)?;
        Self::export_logrank_json(aggregates, &manifest.logrank)?;
        Self::export_meta_json(config, results.len(), workers, &manifest.meta)?;

        log::info!("Wrote sweep artifacts to {}", dir.display());
        Ok(manifest)
    }

    /// One row per run, two per job. The cost totals keep their `actHeat*`
    /// column names so existing plotting scripts read the file unchanged.
    pub fn export_raw_csv<P: AsRef<Path>>(results: &[JobResult], max_agents: usize, path: P) -> Result<()> {
        let mut file = create(path.as_ref())?;

        writeln!(
            file,
            "jobId,mode,seed,sensingNoise,inflowRate,intelligenceCost,maxAgents,survivalTicks,event,\
sigmaProxyCumEnd,sigmaProxyDiffCumEnd,sigmaProxyBehavCumEnd,agentExpenditureCum,\
uptakeCum,actHeatMaintCum,actHeatInfoCum,actHeatDivCum,inflowCum,physicalOutflowCum,\
numericalOutflowCum,births,deaths,divisions,rejectedChildren,finalPopulation,peakPopulation,\
maxAbsResidual,measureTicks,sigmaProxyMeasureMean,populationMeasureMean,uptakeMeasureMean,\
efficiencyMeasureMean,tailTicks,sigmaProxyTailMean,populationTailMean"
        )?;

        for result in results {
            for summary in [&result.random.summary, &result.informed.summary] {
                Self::write_raw_row(&mut file, result.job.id, max_agents, summary)?;
            }
        }

        file.flush()?;
        Ok(())
    }

    fn write_raw_row<W: Write>(file: &mut W, job_id: usize, max_agents: usize, s: &RunSummary) -> Result<()> {
        let measure = s.measure;
        let tail = s.tail;
        writeln!(
            file,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            job_id,
            s.mode,
            s.seed,
            s.noise,
            s.inflow,
            s.cost,
            max_agents,
            s.survival_ticks,
            s.event,
            s.sigma_proxy_cum,
            s.sigma_proxy_diff_cum,
            s.sigma_proxy_behav_cum,
            s.agent_expenditure_cum,
            s.uptake_cum,
            s.maintenance_cost_cum,
            s.info_cost_cum,
            s.division_cost_cum,
            s.inflow_cum,
            s.physical_outflow_cum,
            s.numerical_outflow_cum,
            s.births_total,
            s.deaths_total,
            s.divisions_total,
            s.rejected_total,
            s.final_population,
            s.peak_population,
            s.max_abs_residual,
            measure.map_or(0, |m| m.ticks),
            opt(measure.map(|m| m.sigma_total)),
            opt(measure.map(|m| m.population)),
            opt(measure.map(|m| m.uptake)),
            opt(measure.map(|m| m.efficiency)),
            tail.map_or(0, |m| m.ticks),
            opt(tail.map(|m| m.sigma_total)),
            opt(tail.map(|m| m.population)),
        )?;
        Ok(())
    }

    /// One row per parameter group
    pub fn export_agg_csv<P: AsRef<Path>>(aggregates: &[GroupAggregate], path: P) -> Result<()> {
        let mut file = create(path.as_ref())?;

        let mut header = vec![
            "inflowRate".to_string(),
            "sensingNoise".to_string(),
            "intelligenceCost".to_string(),
            "nPairs".to_string(),
        ];
        for metric in &METRICS {
            header.push(format!("dMean_{}", metric.name));
            header.push(format!("sd_{}", metric.name));
            header.push(format!("ciLo_d{}", metric.ci_suffix));
            header.push(format!("ciHi_d{}", metric.ci_suffix));
            header.push(format!("random_{}", metric.name));
            header.push(format!("informed_{}", metric.name));
        }
        header.extend(
            [
                "rmstRandom",
                "rmstInformed",
                "dRmst",
                "ciLo_dRmst",
                "ciHi_dRmst",
                "hedgesG",
                "logrankZ",
                "logrankP",
                "eventsRandom",
                "eventsInformed",
                "horizon",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        writeln!(file, "{}", header.join(","))?;

        for agg in aggregates {
            let mut row = vec![
                agg.inflow.to_string(),
                agg.noise.to_string(),
                agg.cost.to_string(),
                agg.n_pairs.to_string(),
            ];
            for diff in &agg.metrics {
                row.push(opt(diff.map(|d| d.mean_diff)));
                row.push(opt(diff.map(|d| d.sd_diff)));
                row.push(opt(diff.map(|d| d.ci.lo)));
                row.push(opt(diff.map(|d| d.ci.hi)));
                row.push(opt(diff.map(|d| d.mean_random)));
                row.push(opt(diff.map(|d| d.mean_informed)));
            }
            row.push(agg.rmst_random.to_string());
            row.push(agg.rmst_informed.to_string());
            row.push(agg.d_rmst.to_string());
            row.push(opt(agg.d_rmst_ci.map(|ci| ci.lo)));
            row.push(opt(agg.d_rmst_ci.map(|ci| ci.hi)));
            row.push(opt(agg.hedges_g));
            row.push(agg.log_rank.z.to_string());
            row.push(agg.log_rank.p_value.to_string());
            row.push(agg.events_random.to_string());
            row.push(agg.events_informed.to_string());
            row.push(agg.horizon.to_string());
            writeln!(file, "{}", row.join(","))?;
        }

        file.flush()?;
        Ok(())
    }

    /// Two survival records per job
    pub fn export_survival_csv<P: AsRef<Path>>(results: &[JobResult], path: P) -> Result<()> {
        let mut file = create(path.as_ref())?;
        writeln!(file, "time,event,group,sensingNoise,inflowRate,intelligenceCost,seed")?;

        for record in results.iter().flat_map(JobResult::survival_records) {
            writeln!(
                file,
                "{},{},{},{},{},{},{}",
                record.time, record.event, record.group, record.noise, record.inflow, record.cost, record.seed
            )?;
        }

        file.flush()?;
        Ok(())
    }

    /// Log-rank statistics per group
    pub fn export_logrank_json<P: AsRef<Path>>(aggregates: &[GroupAggregate], path: P) -> Result<()> {
        let groups: Vec<LogRankEntry> = aggregates
            .iter()
            .map(|agg| LogRankEntry {
                key: &agg.key,
                inflow_rate: agg.inflow,
                sensing_noise: agg.noise,
                intelligence_cost: agg.cost,
                observed_informed: agg.log_rank.observed,
                expected_informed: agg.log_rank.expected,
                variance: agg.log_rank.variance,
                z: agg.log_rank.z,
                p_value: agg.log_rank.p_value,
                events_random: agg.events_random,
                events_informed: agg.events_informed,
                n_pairs: agg.n_pairs,
            })
            .collect();

        let doc = LogRankDocument {
            note: LOGRANK_NOTE,
            test: "two-group log-rank, normal approximation, two-sided",
            reference_group: "informed",
            groups,
        };

        let mut file = create(path.as_ref())?;
        serde_json::to_writer_pretty(&mut file, &doc)?;
        file.flush()?;
        Ok(())
    }

    /// Effective configuration, sweep bounds, seeds and creation time
    pub fn export_meta_json<P: AsRef<Path>>(config: &Config, job_count: usize, workers: usize, path: P) -> Result<()> {
        let sweep = &config.sweep;
        let meta = MetaDocument {
            created_at: Utc::now().to_rfc3339(),
            crate_version: crate::VERSION,
            note: PROXY_NOTE,
            config,
            bounds: SweepBounds {
                inflow: Bounds::of(&sweep.inflows),
                cost: Bounds::of(&sweep.costs),
                noise: Bounds::of(&sweep.noises),
            },
            seeds: &sweep.seeds,
            job_count,
            workers,
        };

        let mut file = create(path.as_ref())?;
        serde_json::to_writer_pretty(&mut file, &meta)?;
        file.flush()?;
        Ok(())
    }

    /// Write every captured snapshot; returns the directories created
    pub fn export_snapshots<P: AsRef<Path>>(root: P, results: &[JobResult]) -> Result<Vec<PathBuf>> {
        let root = root.as_ref();
        let mut dirs = Vec::new();

        for result in results {
            for snapshot in result.random.snapshots.iter().chain(&result.informed.snapshots) {
                let dir = root.join(snapshot_dir_name(&result.job, snapshot));
                Self::export_snapshot(&dir, snapshot)?;
                dirs.push(dir);
            }
        }

        Ok(dirs)
    }

    /// Field, three proxy maps and the agent list for one snapshot
    pub fn export_snapshot<P: AsRef<Path>>(dir: P, snapshot: &FieldSnapshot) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        write_grid_csv(dir.join("field.csv"), &snapshot.field)?;
        write_grid_csv(dir.join("sigma_diff.csv"), &snapshot.sigma_diff)?;
        write_grid_csv(dir.join("sigma_behav.csv"), &snapshot.sigma_behav)?;
        write_grid_csv(dir.join("sigma_total.csv"), &snapshot.sigma_total())?;

        let mut file = create(&dir.join("agents.csv"))?;
        writeln!(file, "x,y,vx,vy,energy")?;
        for agent in &snapshot.agents {
            writeln!(file, "{},{},{},{},{}", agent.x, agent.y, agent.vx, agent.vy, agent.energy)?;
        }
        file.flush()?;

        Ok(())
    }
}

/// Directory name keyed by the tagged (seed, cost, noise, inflow, tick) tuple
pub fn snapshot_dir_name(job: &Job, snapshot: &FieldSnapshot) -> String {
    format!(
        "seed{}_cost{:.4}_noise{:.4}_inflow{:.4}_t{}_{}",
        job.seed, job.cost, job.noise, job.inflow, snapshot.tick, snapshot.mode
    )
}

/// Grid as CSV, one lattice row per line
pub fn write_grid_csv<P: AsRef<Path>>(path: P, grid: &Array2<f64>) -> Result<()> {
    let mut file = create(path.as_ref())?;
    for row in grid.rows() {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writeln!(file, "{}", line.join(","))?;
    }
    file.flush()?;
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogRankEntry<'a> {
    key: &'a str,
    inflow_rate: f64,
    sensing_noise: f64,
    intelligence_cost: f64,
    observed_informed: f64,
    expected_informed: f64,
    variance: f64,
    z: f64,
    p_value: f64,
    events_random: usize,
    events_informed: usize,
    n_pairs: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogRankDocument<'a> {
    note: &'static str,
    test: &'static str,
    reference_group: &'static str,
    groups: Vec<LogRankEntry<'a>>,
}

#[derive(Serialize)]
struct Bounds {
    min: f64,
    max: f64,
    values: Vec<f64>,
}

impl Bounds {
    fn of(values: &[f64]) -> Self {
        Self {
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            values: values.to_vec(),
        }
    }
}

#[derive(Serialize)]
struct SweepBounds {
    inflow: Bounds,
    cost: Bounds,
    noise: Bounds,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetaDocument<'a> {
    created_at: String,
    crate_version: &'static str,
    note: &'static str,
    config: &'a Config,
    bounds: SweepBounds,
    seeds: &'a [u64],
    job_count: usize,
    workers: usize,
}
