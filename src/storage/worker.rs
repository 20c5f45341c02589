//! Background disk worker.
//!
//! One thread per store. Jobs arrive on a channel and are drained into
//! two FIFO queues; every pending write is processed before any read, so
//! a piece can never be served before it is durable. Completion events go
//! back to the controller through the async-side channel.
use super::{read_range, write_range, DiskEvent, DiskJob, PieceState, StoreFile};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{mpsc, Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

pub(super) fn spawn(
    files: Arc<Vec<StoreFile>>,
    state: Arc<Mutex<PieceState>>,
    piece_length: u64,
    jobs: mpsc::Receiver<DiskJob>,
    events: UnboundedSender<DiskEvent>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    let worker = Worker {
        files,
        state,
        piece_length,
        jobs,
        events,
    };
    std::thread::Builder::new()
        .name("tidebit-disk".into())
        .spawn(move || worker.run())
}

struct Worker {
    files: Arc<Vec<StoreFile>>,
    state: Arc<Mutex<PieceState>>,
    piece_length: u64,
    jobs: mpsc::Receiver<DiskJob>,
    events: UnboundedSender<DiskEvent>,
}

impl Worker {
    fn run(self) {
        let mut writes = VecDeque::new();
        let mut reads = VecDeque::new();
        loop {
            // Queues are fully drained below, so block for the next job;
            // a closed channel means the store is shutting down.
            match self.jobs.recv() {
                Ok(job) => enqueue(job, &mut writes, &mut reads),
                Err(_) => break,
            }
            while let Ok(job) = self.jobs.try_recv() {
                enqueue(job, &mut writes, &mut reads);
            }
            while let Some(job) = writes.pop_front() {
                if let Err(err) = self.write(job) {
                    return self.fatal(err);
                }
            }
            while let Some(job) = reads.pop_front() {
                if let Err(err) = self.read(job) {
                    return self.fatal(err);
                }
            }
        }
    }

    fn write(&self, job: WriteJob) -> std::io::Result<()> {
        let start = u64::from(job.index) * self.piece_length;
        write_range(&self.files, start, &job.data)?;
        // The write returned from the kernel; only now may the bit flip
        // and a `have` go out.
        self.state.lock().unwrap().bits.set(job.index as usize);
        tracing::trace!(index = job.index, "piece persisted");
        let _ = self.events.send(DiskEvent::WriteDone {
            from: job.from,
            index: job.index,
        });
        Ok(())
    }

    fn read(&self, job: ReadJob) -> std::io::Result<()> {
        let start = u64::from(job.index) * self.piece_length + u64::from(job.begin);
        let mut buf = vec![0u8; job.length as usize];
        read_range(&self.files, start, &mut buf)?;
        let _ = self.events.send(DiskEvent::ReadDone {
            from: job.from,
            index: job.index,
            begin: job.begin,
            data: Bytes::from(buf),
        });
        Ok(())
    }

    fn fatal(&self, err: std::io::Error) {
        tracing::error!(error = %err, "disk worker failed");
        let _ = self.events.send(DiskEvent::Fatal(err.into()));
    }
}

struct WriteJob {
    index: u32,
    from: u32,
    data: Vec<u8>,
}

struct ReadJob {
    index: u32,
    from: u32,
    begin: u32,
    length: u32,
}

fn enqueue(job: DiskJob, writes: &mut VecDeque<WriteJob>, reads: &mut VecDeque<ReadJob>) {
    match job {
        DiskJob::Write { index, from, data } => writes.push_back(WriteJob { index, from, data }),
        DiskJob::Read {
            index,
            from,
            begin,
            length,
        } => reads.push_back(ReadJob {
            index,
            from,
            begin,
            length,
        }),
    }
}
