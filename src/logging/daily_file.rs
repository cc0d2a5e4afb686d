use chrono::NaiveDate;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

// --------------------------------------------------------------------------------------------------------------

struct Inner {
    dir:  PathBuf,
    date: NaiveDate,
    file: Option<File>,
}

impl Inner {
    fn path(&self) -> PathBuf {
        self.dir.join(format!("log_{}.log", self.date.format("%Y-%m-%d")))
    }

    fn open_append(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(self.path())?;
        self.file = Some(file);
        Ok(())
    }
}

// --------------------------------------------------------------------------------------------------------------

/// One log file per calendar day: `<dir>/log_<YYYY-MM-DD>.log`.
/// Cloning shares the same file; the logger writes through a clone while the control loop
/// rotates it and the reporter reads it back.
#[derive(Clone)]
pub struct DailyLog {
    inner: Arc<Mutex<Inner>>,
}

impl DailyLog {
    pub fn open(dir: impl AsRef<Path>, today: NaiveDate) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut inner = Inner { dir, date: today, file: None };
        inner.open_append()?;
        Ok(Self { inner: Arc::new(Mutex::new(inner)) })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while writing a log line must not take logging down with it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current_path(&self) -> PathBuf {
        self.lock().path()
    }

    /// Switch to `today`'s file if the day changed. Returns true when a rotation happened.
    /// Does not log itself: the logger writes through this same lock.
    pub fn rotate_if_needed(&self, today: NaiveDate) -> io::Result<bool> {
        let mut inner = self.lock();
        if inner.date == today {
            return Ok(false);
        }
        if let Some(mut file) = inner.file.take() {
            file.flush()?;
        }
        inner.date = today;
        inner.open_append()?;
        Ok(true)
    }

    /// Everything written to the current day's file so far (empty if it does not exist).
    pub fn read_current(&self) -> io::Result<String> {
        let mut inner = self.lock();
        if let Some(file) = inner.file.as_mut() {
            file.flush()?;
        }
        match fs::read_to_string(inner.path()) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    /// Empty the current file after its content has been reported.
    pub fn clear_current(&self) -> io::Result<()> {
        let mut inner = self.lock();
        inner.file = None;
        File::create(inner.path())?;
        inner.open_append()
    }

    /// `io::Write` handle for the logger target. Lines are teed to stderr.
    pub fn writer(&self) -> DailyLogWriter {
        DailyLogWriter { log: self.clone() }
    }
}

// --------------------------------------------------------------------------------------------------------------

pub struct DailyLogWriter {
    log: DailyLog,
}

impl Write for DailyLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // stderr is best effort; the file is what gets mailed.
        let _ = io::stderr().write_all(buf);

        let mut inner = self.log.lock();
        if inner.file.is_none() {
            inner.open_append()?;
        }
        match inner.file.as_mut() {
            Some(file) => file.write_all(buf).map(|_| buf.len()),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        match self.log.lock().file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

// --------------------------------------------------------------------------------------------------------------
