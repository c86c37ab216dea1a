//! Participant-level parallelism
//!
//! Jobs are split into balanced sub-lists, one per worker thread. Each worker
//! builds its participants sequentially and sends its whole result vector
//! back over a single channel; the coordinator restores the input order.

use chrono::{DateTime, Utc};
use std::sync::mpsc;
use std::thread;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ComputeError;
use crate::participant::Participant;

/// Split `items` into at most `n` balanced sub-lists.
///
/// Each sub-list takes `len / n` contiguous items, and the remaining items
/// are dealt round-robin from the first sub-list.
pub fn chunks<T>(items: Vec<T>, n: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    let n = n.clamp(1, items.len());
    let size = items.len() / n;
    let mut lists: Vec<Vec<T>> = (0..n).map(|_| Vec::with_capacity(size + 1)).collect();
    for (i, item) in items.into_iter().enumerate() {
        let list = if i < size * n { i / size } else { (i - size * n) % n };
        lists[list].push(item);
    }
    lists
}

/// One participant to build
#[derive(Debug, Clone, PartialEq)]
pub struct Job<J> {
    pub pid: String,
    pub input: J,
}

impl<J> Job<J> {
    pub fn new(pid: impl Into<String>, input: J) -> Self {
        Self {
            pid: pid.into(),
            input,
        }
    }
}

/// A job that produced no participant
#[derive(Debug)]
pub struct JobFailure {
    pub pid: String,
    pub error: ComputeError,
}

/// Outcome of one dispatch run
#[derive(Debug)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Built participants, in job order
    pub participants: Vec<Participant>,
    /// Failed jobs, in job order
    pub failures: Vec<JobFailure>,
}

type Outcome = (usize, String, Result<Participant, ComputeError>);

/// Runs participant builds over a fixed number of worker threads
#[derive(Debug, Clone, Copy)]
pub struct ParallelDispatcher {
    workers: usize,
}

impl Default for ParallelDispatcher {
    fn default() -> Self {
        Self::new(thread::available_parallelism().map_or(1, usize::from))
    }
}

impl ParallelDispatcher {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Build every job with `build`, spread over the worker threads.
    ///
    /// Fails only when the job list is empty or no job succeeded.
    pub fn run<J, F>(&self, jobs: Vec<Job<J>>, build: F) -> Result<BatchReport, ComputeError>
    where
        J: Send,
        F: Fn(&Job<J>) -> Result<Participant, ComputeError> + Sync,
    {
        if jobs.is_empty() {
            return Err(ComputeError::EmptyParticipantList);
        }
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let total = jobs.len();
        let lists = chunks(jobs.into_iter().enumerate().collect(), self.workers);
        info!(%run_id, jobs = total, workers = lists.len(), "dispatch started");

        let (tx, rx) = mpsc::channel::<Vec<Outcome>>();
        let mut slots: Vec<Option<(String, Result<Participant, ComputeError>)>> =
            (0..total).map(|_| None).collect();
        let build = &build;

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(lists.len());
            for (worker, list) in lists.into_iter().enumerate() {
                let tx = tx.clone();
                let pending: Vec<(usize, String)> =
                    list.iter().map(|(i, job)| (*i, job.pid.clone())).collect();
                let handle = thread::Builder::new()
                    .name(format!("gaze-worker-{}", worker))
                    .spawn_scoped(scope, move || {
                        let results: Vec<Outcome> = list
                            .into_iter()
                            .map(|(i, job)| (i, job.pid.clone(), build(&job)))
                            .collect();
                        if tx.send(results).is_err() {
                            warn!(worker, "result channel closed");
                        }
                    });
                handles.push((worker, pending, handle));
            }
            drop(tx);

            for results in rx.iter() {
                for (i, pid, result) in results {
                    slots[i] = Some((pid, result));
                }
            }

            for (worker, pending, handle) in handles {
                let failed = match handle {
                    Ok(handle) => handle.join().is_err(),
                    Err(e) => {
                        warn!(worker, error = %e, "worker could not be spawned");
                        true
                    }
                };
                if failed {
                    warn!(worker, "worker stopped without results");
                    for (i, pid) in pending {
                        slots[i].get_or_insert_with(|| {
                            let error = ComputeError::NoValidResult(format!(
                                "worker {} stopped before finishing {}",
                                worker, pid
                            ));
                            (pid, Err(error))
                        });
                    }
                }
            }
        });

        let mut participants = Vec::new();
        let mut failures = Vec::new();
        for (pid, result) in slots.into_iter().flatten() {
            match result {
                Ok(participant) => participants.push(participant),
                Err(error) => {
                    warn!(participant = %pid, error = %error, "participant failed");
                    failures.push(JobFailure { pid, error });
                }
            }
        }
        let finished_at = Utc::now();
        info!(
            %run_id,
            built = participants.len(),
            failed = failures.len(),
            "dispatch finished"
        );
        if participants.is_empty() {
            return Err(ComputeError::NoValidResult(format!(
                "none of {} participants could be built",
                total
            )));
        }
        Ok(BatchReport {
            run_id,
            started_at,
            finished_at,
            participants,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aoi::Aoi;
    use crate::config::AnalysisConfig;
    use crate::scene::BuildOptions;
    use crate::test_support::{recording, regular_fixations};
    use crate::types::{SceneTable, SegmentSpec};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_chunks_balance() {
        let lists = chunks((0..10).collect(), 3);
        assert_eq!(lists, vec![vec![0, 1, 2, 9], vec![3, 4, 5], vec![6, 7, 8]]);
        let lists = chunks((0..11).collect(), 3);
        assert_eq!(lists, vec![vec![0, 1, 2, 9], vec![3, 4, 5, 10], vec![6, 7, 8]]);
    }

    #[test]
    fn test_chunks_clamps_count() {
        assert_eq!(chunks(vec![1, 2], 5), vec![vec![1], vec![2]]);
        assert_eq!(chunks(vec![1, 2, 3], 0), vec![vec![1, 2, 3]]);
        assert!(chunks(Vec::<u8>::new(), 4).is_empty());
    }

    fn build_job(
        job: &Job<i64>,
        config: &Arc<AnalysisConfig>,
        aois: &Arc<Vec<Aoi>>,
    ) -> Result<Participant, ComputeError> {
        let mut table = SceneTable::new();
        if job.input > 0 {
            table.push("task", SegmentSpec::new("s1", 0, job.input));
        }
        Participant::build(
            job.pid.as_str(),
            recording(job.input.max(0), &[], regular_fixations(job.input.max(0), 200)),
            &table,
            aois,
            None,
            BuildOptions::default(),
            Arc::clone(config),
        )
    }

    #[test]
    fn test_run_keeps_job_order() {
        let config = Arc::new(AnalysisConfig::default());
        let aois = Arc::new(Vec::new());
        let jobs: Vec<Job<i64>> = (1..=7)
            .map(|i| Job::new(format!("p{}", i), if i == 4 { 0 } else { 1000 }))
            .collect();
        let report = ParallelDispatcher::new(3)
            .run(jobs, |job| build_job(job, &config, &aois))
            .unwrap();
        let pids: Vec<&str> = report.participants.iter().map(|p| p.pid.as_str()).collect();
        assert_eq!(pids, vec!["p1", "p2", "p3", "p5", "p6", "p7"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].pid, "p4");
        assert!(matches!(report.failures[0].error, ComputeError::NoSegments(_)));
        assert!(report.finished_at >= report.started_at);
    }

    #[test]
    fn test_run_without_success() {
        let config = Arc::new(AnalysisConfig::default());
        let aois = Arc::new(Vec::new());
        let jobs = vec![Job::new("p1", 0), Job::new("p2", 0)];
        let err = ParallelDispatcher::new(2)
            .run(jobs, |job| build_job(job, &config, &aois))
            .unwrap_err();
        assert!(matches!(err, ComputeError::NoValidResult(_)));

        let err = ParallelDispatcher::default()
            .run(Vec::<Job<i64>>::new(), |job| build_job(job, &config, &aois))
            .unwrap_err();
        assert!(matches!(err, ComputeError::EmptyParticipantList));
    }
}
