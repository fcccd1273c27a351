//! Multi-codeword orchestration
//!
//! Codeword 0 always runs on the calling thread. In pooled mode every further codeword
//! has a persistent worker thread parked on its start channel; the pipeline and task
//! are moved to the worker through "start" and come back through "finish", so the
//! handshake is the only synchronisation. In sequential mode the codewords run in
//! index order on the calling thread.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use common::MAX_CODEWORDS;
use crossbeam_channel::{bounded, Receiver, Sender};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::codeword::{CodewordPipeline, Task, TaskOutput};
use crate::PhyError;

/// How codewords beyond the first are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Concurrency {
    /// One persistent worker thread per extra codeword
    #[default]
    Pooled,
    /// Everything on the calling thread
    Sequential,
}

/// Status of every codeword of one call, by codeword index
pub type CodewordResults = [Option<Result<TaskOutput, PhyError>>; MAX_CODEWORDS];

enum Command {
    Run { pipeline: Box<CodewordPipeline>, task: Task },
    Quit,
}

struct Finished {
    pipeline: Box<CodewordPipeline>,
    task: Task,
    result: Result<TaskOutput, PhyError>,
}

struct Worker {
    codeword: usize,
    start: Sender<Command>,
    finish: Receiver<Finished>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(codeword: usize) -> Result<Self, PhyError> {
        let (start_tx, start_rx) = bounded::<Command>(1);
        let (finish_tx, finish_rx) = bounded::<Finished>(1);

        let handle = thread::Builder::new()
            .name(format!("pdsch-cw{}", codeword))
            .spawn(move || worker_loop(codeword, start_rx, finish_tx))
            .map_err(|e| PhyError::InitializationFailed(format!("Failed to spawn worker {}: {}", codeword, e)))?;

        Ok(Self {
            codeword,
            start: start_tx,
            finish: finish_rx,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // A worker that already exited has dropped its receiver
            let _ = self.start.send(Command::Quit);
            if handle.join().is_err() {
                error!("Worker {} terminated abnormally", self.codeword);
            }
        }
    }
}

fn worker_loop(codeword: usize, start: Receiver<Command>, finish: Sender<Finished>) {
    debug!("PDSCH worker for codeword {} started", codeword);
    while let Ok(command) = start.recv() {
        match command {
            Command::Run { mut pipeline, mut task } => {
                let result = execute(codeword, &mut pipeline, &mut task);
                if finish.send(Finished { pipeline, task, result }).is_err() {
                    break;
                }
            }
            Command::Quit => break,
        }
    }
    debug!("PDSCH worker for codeword {} stopped", codeword);
}

/// Run a task, folding a panic into the codeword's status
fn execute(codeword: usize, pipeline: &mut CodewordPipeline, task: &mut Task) -> Result<TaskOutput, PhyError> {
    match panic::catch_unwind(AssertUnwindSafe(|| pipeline.run(task))) {
        Ok(result) => result,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            error!("Codeword {} panicked: {}", codeword, reason);
            Err(PhyError::WorkerFailed { codeword, reason })
        }
    }
}

/// Runs up to MAX_CODEWORDS pipelines per call
pub struct Orchestrator {
    pipelines: [Option<Box<CodewordPipeline>>; MAX_CODEWORDS],
    /// Worker of codeword `i + 1`, empty in sequential mode
    workers: Vec<Worker>,
    concurrency: Concurrency,
}

impl Orchestrator {
    pub fn new(pipelines: Vec<CodewordPipeline>, concurrency: Concurrency) -> Result<Self, PhyError> {
        if pipelines.is_empty() || pipelines.len() > MAX_CODEWORDS {
            return Err(PhyError::InitializationFailed(format!(
                "Invalid number of codeword pipelines: {}",
                pipelines.len()
            )));
        }

        let mut workers = Vec::new();
        if concurrency == Concurrency::Pooled {
            for codeword in 1..pipelines.len() {
                match Worker::spawn(codeword) {
                    Ok(worker) => workers.push(worker),
                    Err(e) => {
                        for worker in &mut workers {
                            worker.stop();
                        }
                        return Err(e);
                    }
                }
            }
        }

        let mut slots: [Option<Box<CodewordPipeline>>; MAX_CODEWORDS] = Default::default();
        for (slot, pipeline) in slots.iter_mut().zip(pipelines) {
            *slot = Some(Box::new(pipeline));
        }
        info!("Codeword orchestrator ready: {:?}, {} workers", concurrency, workers.len());

        Ok(Self {
            pipelines: slots,
            workers,
            concurrency,
        })
    }

    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    pub fn nof_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn pipeline(&self, codeword: usize) -> Result<&CodewordPipeline, PhyError> {
        self.pipelines
            .get(codeword)
            .and_then(|p| p.as_deref())
            .ok_or(PhyError::InvalidCodeword(codeword))
    }

    pub fn pipeline_mut(&mut self, codeword: usize) -> Result<&mut CodewordPipeline, PhyError> {
        self.pipelines
            .get_mut(codeword)
            .and_then(|p| p.as_deref_mut())
            .ok_or(PhyError::InvalidCodeword(codeword))
    }

    /// Staged symbols of the first `nof_codewords` pipelines
    pub fn symbols(&self, nof_codewords: usize) -> Result<Vec<&[Complex32]>, PhyError> {
        self.pipelines
            .iter()
            .take(nof_codewords)
            .enumerate()
            .map(|(cw, p)| p.as_deref().map(|p| p.symbols()).ok_or_else(|| lost_pipeline(cw)))
            .collect()
    }

    /// Mutable staged symbols of the first `nof_codewords` pipelines
    pub fn symbols_mut(&mut self, nof_codewords: usize) -> Result<Vec<&mut [Complex32]>, PhyError> {
        self.pipelines
            .iter_mut()
            .take(nof_codewords)
            .enumerate()
            .map(|(cw, p)| p.as_deref_mut().map(|p| p.symbols_mut()).ok_or_else(|| lost_pipeline(cw)))
            .collect()
    }

    /// Run every present task; tasks are handed back in place with their soft buffers
    pub fn run(&mut self, tasks: &mut [Option<Task>; MAX_CODEWORDS]) -> CodewordResults {
        let mut results: CodewordResults = Default::default();
        let mut dispatched = [false; MAX_CODEWORDS];

        // Start the workers first so they overlap with codeword 0
        for codeword in 1..MAX_CODEWORDS {
            let Some(worker) = self.workers.get(codeword - 1) else {
                break;
            };
            let Some(task) = tasks[codeword].take() else {
                continue;
            };
            let Some(pipeline) = self.pipelines[codeword].take() else {
                tasks[codeword] = Some(task);
                results[codeword] = Some(Err(lost_pipeline(codeword)));
                continue;
            };
            match worker.start.send(Command::Run { pipeline, task }) {
                Ok(()) => dispatched[codeword] = true,
                Err(err) => {
                    if let Command::Run { pipeline, task } = err.into_inner() {
                        self.pipelines[codeword] = Some(pipeline);
                        tasks[codeword] = Some(task);
                    }
                    results[codeword] = Some(Err(PhyError::WorkerFailed {
                        codeword,
                        reason: "worker not running".to_string(),
                    }));
                }
            }
        }

        // Inline codewords: 0, plus everything not owned by a worker
        for codeword in 0..MAX_CODEWORDS {
            if dispatched[codeword] || results[codeword].is_some() {
                continue;
            }
            let Some(task) = tasks[codeword].as_mut() else {
                continue;
            };
            results[codeword] = Some(match self.pipelines[codeword].as_deref_mut() {
                Some(pipeline) => execute(codeword, pipeline, task),
                None => Err(lost_pipeline(codeword)),
            });
        }

        // Wait for the workers and take pipeline and task back
        for codeword in 1..MAX_CODEWORDS {
            if !dispatched[codeword] {
                continue;
            }
            let Some(worker) = self.workers.get(codeword - 1) else {
                continue;
            };
            results[codeword] = Some(match worker.finish.recv() {
                Ok(finished) => {
                    self.pipelines[codeword] = Some(finished.pipeline);
                    tasks[codeword] = Some(finished.task);
                    finished.result
                }
                Err(_) => Err(PhyError::WorkerFailed {
                    codeword,
                    reason: "worker exited without reporting".to_string(),
                }),
            });
        }

        results
    }

    /// Stop and join every worker
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        for worker in &mut self.workers {
            worker.stop();
        }
        info!("Stopped {} codeword workers", self.workers.len());
        self.workers.clear();
    }
}

fn lost_pipeline(codeword: usize) -> PhyError {
    PhyError::WorkerFailed {
        codeword,
        reason: "pipeline lost by a failed worker".to_string(),
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::ModemTables;
    use crate::pdsch::codeword::EncodeJob;
    use common::Modulation;
    use interfaces::{ChannelCoder, CoderError, CodingParams, DecodeOutcome, SoftBufferRx, SoftBufferTx};
    use std::sync::Arc;

    /// Coder that panics on demand and otherwise writes zeros
    struct TestCoder {
        panic_on_encode: bool,
    }

    impl ChannelCoder for TestCoder {
        fn encode(
            &mut self,
            params: &CodingParams,
            _softbuffer: &mut SoftBufferTx,
            _data: &[u8],
            coded_bits: &mut [u8],
        ) -> Result<(), CoderError> {
            if self.panic_on_encode {
                panic!("encoder exploded");
            }
            coded_bits[..params.nof_bits].fill(0);
            Ok(())
        }

        fn decode(
            &mut self,
            _params: &CodingParams,
            _softbuffer: &mut SoftBufferRx,
            _llr: &[f32],
            _data: &mut [u8],
        ) -> Result<DecodeOutcome, CoderError> {
            Ok(DecodeOutcome::default())
        }
    }

    fn orchestrator(concurrency: Concurrency, panic_cw1: bool) -> Orchestrator {
        let modem = Arc::new(ModemTables::new());
        let pipelines = (0..MAX_CODEWORDS)
            .map(|cw| {
                let coder = TestCoder {
                    panic_on_encode: panic_cw1 && cw == 1,
                };
                CodewordPipeline::new(cw, 64, Box::new(coder), Arc::clone(&modem))
            })
            .collect();
        Orchestrator::new(pipelines, concurrency).unwrap()
    }

    fn encode_task() -> Task {
        Task::Encode(EncodeJob {
            params: CodingParams {
                tbs: 8,
                nof_bits: 64,
                modulation: Modulation::Qpsk,
                nof_layers: 1,
                rv: 0,
                max_iterations: 1,
            },
            softbuffer: SoftBufferTx::with_capacity(1, 8),
            sequence: vec![0u8; 64 * 6].into(),
            nof_symbols: 32,
        })
    }

    #[test]
    fn test_pooled_and_sequential_agree() {
        for concurrency in [Concurrency::Pooled, Concurrency::Sequential] {
            let mut orch = orchestrator(concurrency, false);
            let mut tasks = [Some(encode_task()), Some(encode_task())];
            let results = orch.run(&mut tasks);
            assert!(results.iter().all(|r| matches!(r, Some(Ok(TaskOutput::Encoded)))));
            assert!(tasks.iter().all(|t| t.is_some()));
            assert_eq!(orch.pipeline(0).unwrap().symbols()[..32], orch.pipeline(1).unwrap().symbols()[..32]);
        }
    }

    #[test]
    fn test_worker_panic_is_reported() {
        let mut orch = orchestrator(Concurrency::Pooled, true);
        let mut tasks = [Some(encode_task()), Some(encode_task())];
        let results = orch.run(&mut tasks);
        assert!(matches!(results[0], Some(Ok(_))));
        assert!(matches!(
            &results[1],
            Some(Err(PhyError::WorkerFailed { codeword: 1, reason })) if reason.contains("exploded")
        ));

        // The worker survives and keeps serving
        let mut tasks = [Some(encode_task()), None];
        let results = orch.run(&mut tasks);
        assert!(matches!(results[0], Some(Ok(_))));
        assert!(results[1].is_none());
    }

    #[test]
    fn test_shutdown_joins_workers() {
        let mut orch = orchestrator(Concurrency::Pooled, false);
        assert_eq!(orch.nof_workers(), 1);
        orch.shutdown();
        assert_eq!(orch.nof_workers(), 0);

        // Without workers the extra codeword runs inline
        let mut tasks = [Some(encode_task()), Some(encode_task())];
        let results = orch.run(&mut tasks);
        assert!(results.iter().all(|r| matches!(r, Some(Ok(_)))));
    }
}
