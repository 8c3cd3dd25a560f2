//! Bounded-memory, back-pressured compress-and-write pipeline (C9).
//!
//! Grounded on `bpWriterThreads.cxx`/`bpThreadPool.cxx`, and directly
//! descended from the teacher's own unfinished `block::parallel::ParallelPipe`
//! sketch: a `rayon::ThreadPool` for compression fanned into a single
//! writer thread, generalized here into a real working pipeline using
//! `crossbeam_channel` instead of `std::sync::mpsc`.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};

use crate::compression::{compress, max_compressed_size, Compression};
use crate::error::{Error, Result};

/// A signed-byte counting semaphore: reservations can temporarily push it
/// negative only in the sense that callers block until it would stay >= 0.
struct Budget {
    state: Mutex<i64>,
    available: Condvar,
}

impl Budget {
    fn new(total: i64) -> Self {
        Self { state: Mutex::new(total), available: Condvar::new() }
    }

    fn reserve(&self, amount: i64) {
        let mut free = self.state.lock().unwrap();
        while *free < amount {
            free = self.available.wait(free).unwrap();
        }
        *free -= amount;
    }

    fn release(&self, amount: i64) {
        let mut free = self.state.lock().unwrap();
        *free += amount;
        self.available.notify_all();
    }
}

/// One compressed chunk ready to be persisted, in submission order per the
/// writer channel (a single consumer reads every submitted job in FIFO order).
pub struct WriteJob {
    pub compressed: Vec<u8>,
    pub write: Box<dyn FnOnce(&[u8]) -> Result<()> + Send>,
    reservation: i64,
}

/// The compress-then-write pipeline. One [`WriterPipeline`] is shared by
/// every pyramid level and channel of a single converter run.
pub struct WriterPipeline {
    compression_pool: rayon::ThreadPool,
    budget: Arc<Budget>,
    sender: Option<Sender<WriteJob>>,
    writer_thread: Option<JoinHandle<Result<()>>>,
    in_flight: Arc<(Mutex<u64>, Condvar)>,
    first_error: Arc<Mutex<Option<Error>>>,
}

impl WriterPipeline {
    pub fn new(thread_count: usize, max_buffer_bytes: i64) -> Result<Self> {
        let compression_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(thread_count.max(1))
            .build()
            .map_err(|error| Error::internal(error.to_string()))?;

        let (sender, receiver) = bounded::<WriteJob>(thread_count.max(1) * 4);
        let budget = Arc::new(Budget::new(max_buffer_bytes));
        let first_error: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
        let writer_budget = budget.clone();
        let writer_error = first_error.clone();

        let writer_thread = std::thread::Builder::new()
            .name("ims-writer".into())
            .spawn(move || {
                for job in receiver {
                    let result = (job.write)(&job.compressed);
                    writer_budget.release(job.reservation);
                    if let Err(error) = result {
                        let mut slot = writer_error.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(error);
                        }
                    }
                }
                Ok(())
            })
            .map_err(|error| Error::internal(error.to_string()))?;

        Ok(Self {
            compression_pool,
            budget,
            sender: Some(sender),
            writer_thread: Some(writer_thread),
            in_flight: Arc::new((Mutex::new(0), Condvar::new())),
            first_error,
        })
    }

    /// Reserves budget for `data.len()` plus the codec's worst-case output,
    /// then schedules (pre_fn, compress, write) on the compression pool.
    /// `pre_fn`, if any, runs on the same worker thread as the compression
    /// that follows it - this is the "pre-function" pattern: cascaded
    /// pyramid resampling runs here so the buffer never crosses threads
    /// between resample and compress.
    pub fn start_write(
        &self,
        mut data: Vec<u8>,
        voxel_size: usize,
        compression: Compression,
        pre_fn: Option<Box<dyn FnOnce(&mut Vec<u8>) + Send>>,
        write: Box<dyn FnOnce(&[u8]) -> Result<()> + Send>,
    ) {
        let bound = max_compressed_size(compression, voxel_size, data.len());
        let reservation = (data.len() + bound) as i64;
        self.budget.reserve(reservation);

        let sender = self.sender.clone().expect("pipeline already finished");
        let budget = self.budget.clone();
        let in_flight = self.in_flight.clone();
        let first_error = self.first_error.clone();

        {
            let (lock, _) = &*in_flight;
            *lock.lock().unwrap() += 1;
        }

        self.compression_pool.spawn(move || {
            if let Some(pre_fn) = pre_fn {
                pre_fn(&mut data);
            }

            let mut compressed = Vec::with_capacity(bound);
            let outcome = compress(compression, voxel_size, &data, &mut compressed);

            let job_result = match outcome {
                Ok(()) => sender
                    .send(WriteJob { compressed, write, reservation })
                    .map_err(|_| Error::internal("writer thread gone".into())),
                Err(error) => {
                    budget.release(reservation);
                    Err(error)
                }
            };

            if let Err(error) = job_result {
                let mut slot = first_error.lock().unwrap();
                if slot.is_none() {
                    *slot = Some(error);
                }
            }

            let (lock, condvar) = &*in_flight;
            let mut count = lock.lock().unwrap();
            *count -= 1;
            if *count == 0 {
                condvar.notify_all();
            }
        });
    }

    fn wait_for_compression_pool(&self) {
        let (lock, condvar) = &*self.in_flight;
        let mut count = lock.lock().unwrap();
        while *count > 0 {
            count = condvar.wait(count).unwrap();
        }
    }

    /// Drains the compression pool, closes the writer channel, joins the
    /// writer thread, and propagates the first error encountered, if any.
    pub fn finish(mut self) -> Result<()> {
        self.wait_for_compression_pool();
        drop(self.sender.take());

        if let Some(handle) = self.writer_thread.take() {
            handle.join().map_err(|_| Error::internal("writer thread panicked".into()))??;
        }

        if let Some(error) = self.first_error.lock().unwrap().take() {
            return Err(error);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn every_submitted_job_gets_written() {
        let pipeline = WriterPipeline::new(2, 1 << 20).unwrap();
        let written = Arc::new(AtomicUsize::new(0));

        for i in 0..8u8 {
            let written = written.clone();
            pipeline.start_write(
                vec![i; 64],
                1,
                Compression::None,
                None,
                Box::new(move |_bytes| {
                    written.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }

        pipeline.finish().unwrap();
        assert_eq!(written.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn first_write_error_is_propagated() {
        let pipeline = WriterPipeline::new(1, 1 << 20).unwrap();
        pipeline.start_write(
            vec![1; 16],
            1,
            Compression::None,
            None,
            Box::new(|_| Err(Error::internal("boom".into()))),
        );

        let result = pipeline.finish();
        assert!(result.is_err());
    }
}
