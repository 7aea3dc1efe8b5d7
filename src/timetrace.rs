//! Bounded in-memory trace of handling stages, dumped on request.

use std::{
    collections::VecDeque,
    fs,
    io::{self, BufWriter, Write},
    path::PathBuf,
    time::{Duration, Instant},
};

pub const DEFAULT_CAPACITY: usize = 1 << 16;

#[derive(Debug, Clone, Copy)]
struct Event {
    at: Duration,
    label: &'static str,
}

#[derive(Debug)]
pub struct TimeTrace {
    start: Instant,
    events: VecDeque<Event>,
    capacity: usize,
    output: Option<PathBuf>,
}

impl TimeTrace {
    /// `output` is the file dumps are written to; `None` dumps to the log.
    pub fn new(output: Option<PathBuf>) -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, output)
    }

    pub fn with_capacity(capacity: usize, output: Option<PathBuf>) -> Self {
        Self {
            start: Instant::now(),
            events: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity: capacity.max(1),
            output,
        }
    }

    /// Records `label` at the current time, evicting the oldest event when
    /// the buffer is full.
    pub fn record(&mut self, label: &'static str) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(Event {
            at: self.start.elapsed(),
            label,
        });
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Writes out and clears the buffered events. Returns the file written,
    /// if any.
    pub fn dump(&mut self) -> io::Result<Option<PathBuf>> {
        let written = match &self.output {
            Some(path) => {
                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir)?;
                }
                let mut file = BufWriter::new(fs::File::create(path)?);
                self.write_to(&mut file)?;
                file.flush()?;
                Some(path.clone())
            }
            None => {
                for line in self.lines() {
                    log::info!("{line}");
                }
                None
            }
        };
        self.events.clear();
        Ok(written)
    }

    fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(
            out,
            "# time trace, {} events, dumped at {}",
            self.events.len(),
            chrono::Local::now().to_rfc3339()
        )?;
        for line in self.lines() {
            writeln!(out, "{line}")?;
        }
        Ok(())
    }

    fn lines(&self) -> impl Iterator<Item = String> + '_ {
        let mut previous = self.events.front().map(|event| event.at);
        self.events.iter().map(move |event| {
            let delta = event.at - previous.unwrap_or(event.at);
            previous = Some(event.at);
            format!(
                "{:>12.3} us (+{:>9.3} us): {}",
                micros(event.at),
                micros(delta),
                event.label
            )
        })
    }
}

fn micros(time: Duration) -> f64 {
    time.as_secs_f64() * 1e6
}
