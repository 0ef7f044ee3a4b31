//! Background thread draining a shared streaming engine.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use geoclip_core::SampleCoord;
use tracing::{debug, warn};

use crate::engine::ClipmapStreamingEngine;
use crate::error::{Result, StreamingError};
use crate::upload::ClipmapUploader;

/// Work request sent to the worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerRequest {
    /// Drain every queued job.
    Drain,
    /// Finish and hand the uploader back.
    Shutdown,
}

/// Handle to the background streaming thread.
///
/// Drain requests coalesce: the request channel holds at most one pending
/// drain, and a drain always empties the whole queue, so jobs enqueued
/// before [`notify`](Self::notify) are never missed.
pub struct StreamingWorker<U: ClipmapUploader + Send + 'static> {
    engine: Arc<ClipmapStreamingEngine>,
    request_tx: Sender<WorkerRequest>,
    error_rx: Receiver<StreamingError>,
    thread: Option<JoinHandle<U>>,
}

impl<U: ClipmapUploader + Send + 'static> StreamingWorker<U> {
    /// Spawn a worker that owns `uploader` until shutdown.
    pub fn spawn(engine: Arc<ClipmapStreamingEngine>, uploader: U) -> Result<Self> {
        let (request_tx, request_rx) = channel::bounded::<WorkerRequest>(1);
        let (error_tx, error_rx) = channel::unbounded::<StreamingError>();

        let worker_engine = Arc::clone(&engine);
        let thread = thread::Builder::new()
            .name("clipmap-streaming".to_string())
            .spawn(move || Self::worker_loop(&worker_engine, uploader, &request_rx, &error_tx))
            .map_err(StreamingError::WorkerSpawn)?;

        debug!("Spawned clipmap streaming worker");
        Ok(Self {
            engine,
            request_tx,
            error_rx,
            thread: Some(thread),
        })
    }

    /// Drains the engine once per wake-up. Drain errors go to `error_tx`; the
    /// uploader is handed back on shutdown, when the handle is dropped, or
    /// when nobody is left to receive errors.
    fn worker_loop(
        engine: &ClipmapStreamingEngine,
        mut uploader: U,
        request_rx: &Receiver<WorkerRequest>,
        error_tx: &Sender<StreamingError>,
    ) -> U {
        loop {
            match request_rx.recv() {
                Ok(WorkerRequest::Drain) => {
                    if let Err(err) = engine.drain(&mut uploader) {
                        warn!(error = %err, "Streaming worker drain failed");
                        if error_tx.send(err).is_err() {
                            return uploader;
                        }
                    }
                }
                Ok(WorkerRequest::Shutdown) | Err(_) => return uploader,
            }
        }
    }

    pub fn engine(&self) -> &Arc<ClipmapStreamingEngine> {
        &self.engine
    }

    /// Wake the worker to drain the queue (non-blocking).
    pub fn notify(&self) {
        // A full channel already holds a drain request.
        let _ = self.request_tx.try_send(WorkerRequest::Drain);
    }

    /// Move the camera, enqueue jobs and wake the worker.
    pub fn request_update(&self, camera: SampleCoord) -> usize {
        let enqueued = self.engine.request_update(camera);
        if enqueued > 0 {
            self.notify();
        }
        enqueued
    }

    /// Next error reported by the worker, if any (non-blocking).
    pub fn try_recv_error(&self) -> Option<StreamingError> {
        match self.error_rx.try_recv() {
            Ok(err) => Some(err),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Finish outstanding drains, stop the thread and return the uploader.
    pub fn shutdown(mut self) -> Result<U> {
        let thread = self.thread.take().ok_or(StreamingError::WorkerPanicked)?;
        // Blocks until a pending drain request has been picked up.
        let _ = self.request_tx.send(WorkerRequest::Shutdown);
        let uploader = thread.join().map_err(|_| StreamingError::WorkerPanicked)?;
        debug!("Clipmap streaming worker stopped");
        Ok(uploader)
    }
}

impl<U: ClipmapUploader + Send + 'static> Drop for StreamingWorker<U> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.request_tx.send(WorkerRequest::Shutdown);
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::TerrainGenerator;
    use crate::upload::RecordingUploader;
    use geoclip_core::{Attribute, AttributeConfig, ClipmapConfig};

    fn shared_engine() -> Arc<ClipmapStreamingEngine> {
        let config = ClipmapConfig::new(2, 15)
            .with_attribute(Attribute::Height, AttributeConfig::new(32, 32).with_tile_size(8))
            .with_attribute(Attribute::Diffuse, AttributeConfig::new(32, 32).with_tile_size(8))
            .with_attribute(Attribute::Normal, AttributeConfig::new(32, 32).with_tile_size(8));
        Arc::new(ClipmapStreamingEngine::with_terrain(config, &TerrainGenerator::with_seed(4)).unwrap())
    }

    #[test]
    fn worker_drains_before_shutdown() {
        let engine = shared_engine();
        let worker = StreamingWorker::spawn(Arc::clone(&engine), RecordingUploader::new()).unwrap();
        assert_eq!(worker.request_update(SampleCoord::ZERO), 2);

        let uploader = worker.shutdown().unwrap();
        assert_eq!(uploader.records().len(), 2);
        assert_eq!(engine.pending_jobs(), 0);
        assert!(engine.level_snapshots().iter().all(|level| level.is_initialized()));
    }

    #[test]
    fn worker_reports_upload_failures() {
        let engine = shared_engine();
        let mut uploader = RecordingUploader::new();
        uploader.fail_next(0);
        let worker = StreamingWorker::spawn(Arc::clone(&engine), uploader).unwrap();
        worker.request_update(SampleCoord::ZERO);

        let errors = worker.error_rx.clone();
        let uploader = worker.shutdown().unwrap();
        assert!(errors.try_recv().unwrap().is_upload_failure());

        // The failed drain stopped before level 1.
        assert!(uploader.records().is_empty());
        assert_eq!(engine.pending_jobs(), 1);
        assert!(!engine.level_snapshot(0).unwrap().pending);
    }
}
