//! Chrome Tracing collector for job execution visualization.
//!
//! Every executed job becomes one [`JobSpan`]: which thread ran it, that
//! thread's running job index, and the queue backlog observed when the job
//! was claimed. Spans land in thread-local buffers (no cross-thread
//! contention on the hot path) and export as a JSON file loadable in
//! chrome://tracing or ui.perfetto.dev, with index and backlog attached as
//! event args. Workers install a [`CollectorGuard`] so their buffers are
//! flushed when they exit; waiter threads that execute jobs cooperatively
//! should do the same before exporting.

use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// One executed job, as seen by the thread that ran it.
#[derive(Debug, Clone)]
pub struct JobSpan {
    /// Worker id (or a waiter-chosen id) of the executing thread.
    pub worker: usize,
    /// How many jobs the thread had executed before this one.
    pub index: u64,
    /// Approximate queue length when the job was claimed. A persistently
    /// high value means producers outrun the workers.
    pub backlog: usize,
    pub start_us: u64,
    pub duration_us: u64,
}

thread_local! {
    static SPAN_BUFFER: RefCell<Vec<JobSpan>> = RefCell::new(Vec::with_capacity(10000));
    static EXECUTED: Cell<u64> = Cell::new(0);
}

lazy_static::lazy_static! {
    static ref GLOBAL_START: Instant = Instant::now();
    static ref EPOCH_START_US: u64 = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_micros() as u64;
    static ref ALL_BUFFERS: Mutex<Vec<Vec<JobSpan>>> = Mutex::new(Vec::new());
}

/// Records one finished job into the current thread's buffer. The job
/// index is the thread's own executed-job count.
pub fn record_span(worker: usize, backlog: usize, start: Instant, duration: Duration) {
    let index = EXECUTED.with(|count| {
        let index = count.get();
        count.set(index + 1);
        index
    });
    let start_us = (start.duration_since(*GLOBAL_START).as_micros() as u64) + *EPOCH_START_US;
    let duration_us = duration.as_micros() as u64;

    SPAN_BUFFER.with(|buf| {
        buf.borrow_mut().push(JobSpan {
            worker,
            index,
            backlog,
            start_us,
            duration_us,
        });
    });
}

/// Moves the current thread's buffer into the global list. Each recording
/// thread must call this (or drop a [`CollectorGuard`]) before export.
pub fn collect_local_spans() {
    SPAN_BUFFER.with(|buf| {
        let mut local_buf = buf.borrow_mut();
        if !local_buf.is_empty() {
            let mut global = ALL_BUFFERS.lock().unwrap();
            global.push(std::mem::take(&mut *local_buf));
        }
    });
}

/// Exports all collected job spans to a Chrome Tracing JSON file. Spans
/// group by worker id (`tid`); the job index and claim-time backlog ride
/// along in `args`.
pub fn export_to_file(path: &str) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let buffers = ALL_BUFFERS.lock().unwrap();

    write!(writer, "[\n")?;
    let mut first = true;

    for buffer in buffers.iter() {
        for span in buffer {
            if !first {
                write!(writer, ",\n")?;
            }
            first = false;

            // ph: X is "Complete Event" (requires dur)
            write!(
                writer,
                "{{\"name\":\"job\",\"ph\":\"X\",\"ts\":{},\"dur\":{},\"pid\":1,\"tid\":{},\
                 \"args\":{{\"index\":{},\"backlog\":{}}}}}",
                span.start_us, span.duration_us, span.worker, span.index, span.backlog
            )?;
        }
    }

    write!(writer, "\n]\n")?;
    writer.flush()?;

    Ok(())
}

/// RAII span covering one job execution: claim-time state is captured at
/// construction, the span is recorded on drop.
pub struct JobSpanGuard {
    worker: usize,
    backlog: usize,
    start: Instant,
}

impl JobSpanGuard {
    pub fn begin(worker: usize, backlog: usize) -> Self {
        Self {
            worker,
            backlog,
            start: Instant::now(),
        }
    }
}

impl Drop for JobSpanGuard {
    fn drop(&mut self) {
        record_span(self.worker, self.backlog, self.start, self.start.elapsed());
    }
}

/// RAII guard that collects the local spans when dropped.
pub struct CollectorGuard;

impl Drop for CollectorGuard {
    fn drop(&mut self) {
        collect_local_spans();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_records_indexed_spans() {
        {
            let _span = JobSpanGuard::begin(3, 17);
        }
        {
            let _span = JobSpanGuard::begin(3, 2);
        }

        SPAN_BUFFER.with(|buf| {
            let buf = buf.borrow();
            assert!(buf.len() >= 2);
            let pair = &buf[buf.len() - 2..];
            assert_eq!(pair[0].worker, 3);
            assert_eq!(pair[0].backlog, 17);
            assert_eq!(pair[1].index, pair[0].index + 1);
        });

        collect_local_spans();
        let drained = SPAN_BUFFER.with(|buf| buf.borrow().len());
        assert_eq!(drained, 0);
    }
}
