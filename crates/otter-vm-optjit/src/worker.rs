//! Background code generation.
//!
//! Jobs run on a dedicated thread, each against its own
//! [`CompilationUnit`]; the finished units travel back over a channel and are
//! linked by whichever thread installs code. A unit is never touched by two
//! threads at once.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use crate::config::JitOptions;
use crate::error::JitError;
use crate::masm::MacroAssembler;
use crate::unit::{CompilationUnit, FinishedUnit};

/// Generation work for one unit.
pub type CompileJob =
    Box<dyn FnOnce(&mut CompilationUnit, &mut MacroAssembler) -> Result<(), JitError> + Send>;

struct CompileRequest {
    unit_id: u64,
    job: CompileJob,
}

/// Result of one job.
#[derive(Debug)]
pub enum CompileResult {
    /// Generation succeeded.
    Finished {
        /// Caller-chosen identifier of the unit.
        unit_id: u64,
        /// The finished unit, ready to link.
        unit: FinishedUnit,
    },
    /// Generation or finishing failed; the unit was dropped.
    Failed {
        /// Caller-chosen identifier of the unit.
        unit_id: u64,
        /// What went wrong.
        error: JitError,
    },
}

impl CompileResult {
    /// Identifier of the unit this result belongs to.
    pub fn unit_id(&self) -> u64 {
        match self {
            Self::Finished { unit_id, .. } | Self::Failed { unit_id, .. } => *unit_id,
        }
    }
}

/// Handle to the background generation thread.
pub struct CompileWorker {
    request_tx: Option<Sender<CompileRequest>>,
    result_rx: Receiver<CompileResult>,
    handle: Option<JoinHandle<()>>,
}

impl CompileWorker {
    /// Start the worker thread.
    pub fn spawn(options: JitOptions) -> Result<Self, JitError> {
        let (request_tx, request_rx) = mpsc::channel::<CompileRequest>();
        let (result_tx, result_rx) = mpsc::channel::<CompileResult>();

        let handle = thread::Builder::new()
            .name("otter-optjit-bg".to_string())
            .spawn(move || run_background_worker(options, request_rx, result_tx))?;

        Ok(Self {
            request_tx: Some(request_tx),
            result_rx,
            handle: Some(handle),
        })
    }

    /// Queue `job` to generate unit `unit_id`.
    pub fn submit(
        &self,
        unit_id: u64,
        job: impl FnOnce(&mut CompilationUnit, &mut MacroAssembler) -> Result<(), JitError>
        + Send
        + 'static,
    ) -> Result<(), JitError> {
        let request_tx = self.request_tx.as_ref().ok_or(JitError::WorkerGone)?;
        request_tx
            .send(CompileRequest {
                unit_id,
                job: Box::new(job),
            })
            .map_err(|_| JitError::WorkerGone)
    }

    /// Wait for the next result.
    pub fn recv(&self) -> Result<CompileResult, JitError> {
        self.result_rx.recv().map_err(|_| JitError::WorkerGone)
    }

    /// Next result if one is ready.
    pub fn try_recv(&self) -> Result<Option<CompileResult>, JitError> {
        match self.result_rx.try_recv() {
            Ok(result) => Ok(Some(result)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(JitError::WorkerGone),
        }
    }
}

impl Drop for CompileWorker {
    fn drop(&mut self) {
        self.request_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_background_worker(
    options: JitOptions,
    request_rx: Receiver<CompileRequest>,
    result_tx: Sender<CompileResult>,
) {
    for request in request_rx {
        let unit_id = request.unit_id;
        let mut unit = CompilationUnit::new(options);
        let mut masm = MacroAssembler::new();

        let result = match (request.job)(&mut unit, &mut masm).and_then(|()| unit.finish(masm)) {
            Ok(unit) => CompileResult::Finished { unit_id, unit },
            Err(error) => {
                tracing::warn!(unit_id, %error, "optimizing compile failed");
                CompileResult::Failed { unit_id, error }
            }
        };
        if result_tx.send(result).is_err() {
            break;
        }
    }
}
