//! Job files: claiming them from the jobs directory and executing their commands.
//!
//! A job file is a `.job` file inside the jobs directory. Its commands are executed one after
//! the other against the store, results are written into a `.out` file next to it, and every
//! `BACKUP` command writes a numbered `<job>-<n>.bck` snapshot of the store.
use std::fs::{self, File, ReadDir};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::{KvsEngine, KvsError, Result};

mod backup;
mod parser;

pub use self::backup::{BackupPermit, Backups};
pub use self::parser::{parse_line, Command, HELP_TEXT};

/// One job file claimed by a job worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTask {
    /// path of the `.job` file
    pub input: PathBuf,
    /// path of the `.out` file results are written into
    pub output: PathBuf,
    /// the job file's stem, used to name its backups
    pub name: String,
}

impl JobTask {
    /// builds the task for the `.job` file at `input`. Returns `None` for any other file.
    pub fn from_path(input: &Path) -> Option<JobTask> {
        if input.extension()? != "job" {
            return None;
        }
        let name = input.file_stem()?.to_str()?.to_string();
        Some(JobTask {
            input: input.to_path_buf(),
            output: input.with_extension("out"),
            name,
        })
    }

    /// the path of this job's `n`th backup file
    pub fn backup_path(&self, n: usize) -> PathBuf {
        let dir = self.input.parent().unwrap_or_else(|| Path::new("."));
        dir.join(format!("{}-{}.bck", self.name, n))
    }
}

/// The jobs directory, shared by all job workers.
///
/// Workers claim job files through [`claim_next`]; the directory listing is only advanced while
/// holding its lock, so no two workers ever claim the same file.
///
/// [`claim_next`]: #method.claim_next
#[derive(Debug)]
pub struct JobDirectory {
    dir: PathBuf,
    entries: Mutex<ReadDir>,
}

impl JobDirectory {
    /// opens the listing of the jobs directory at `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir)?;
        Ok(JobDirectory {
            dir: dir.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    /// the path of the jobs directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// claims the next unclaimed `.job` file, or returns `None` once the directory is exhausted
    pub fn claim_next(&self) -> Result<Option<JobTask>> {
        let mut entries = self.entries.lock()?;
        for entry in entries.by_ref() {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(task) = JobTask::from_path(&entry.path()) {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }
}

/// Executes the job file of `task` against `engine`, writing results into the task's output
/// file.
///
/// # Errors
/// returns an error if the job or output file could not be opened, the output could not be
/// written, or a backup thread could not be created
#[instrument(skip(engine, backups), fields(job = %task.name))]
pub fn run_job<E: KvsEngine>(engine: &E, backups: &Backups, task: &JobTask) -> Result<()> {
    let input = BufReader::new(File::open(&task.input)?);
    let mut output = BufWriter::new(File::create(&task.output)?);
    execute(engine, backups, task, input, &mut output)?;
    output.flush()?;
    info!("job finished");
    Ok(())
}

/// Executes the commands read from `input` one after the other. Malformed lines are reported
/// and skipped, the end of `input` ends the job.
pub fn execute<E, R, W>(
    engine: &E,
    backups: &Backups,
    task: &JobTask,
    input: R,
    output: &mut W,
) -> Result<()>
where
    E: KvsEngine,
    R: BufRead,
    W: Write,
{
    let mut backup_count = 0;
    for (number, line) in input.lines().enumerate() {
        let line = line?;
        match parse_line(&line) {
            Command::Write(pairs) => {
                for (key, value) in pairs {
                    if let Err(e) = engine.set(key, value) {
                        warn!(line = number + 1, "Failed to write pair: {}", e);
                    }
                }
            }
            Command::Read(keys) => read(engine, &keys, output)?,
            Command::Delete(keys) => delete(engine, &keys, output)?,
            Command::Show => engine.dump(output)?,
            Command::Wait(delay) => {
                if delay > 0 {
                    debug!(delay, "waiting");
                    thread::sleep(Duration::from_millis(delay));
                }
            }
            Command::Backup => {
                backup_count += 1;
                backup(engine, backups, task.backup_path(backup_count))?;
            }
            Command::Help => output.write_all(HELP_TEXT.as_bytes())?,
            Command::Empty => {}
            Command::Invalid(reason) => {
                warn!(line = number + 1, "Invalid command. See HELP for usage: {}", reason)
            }
        }
    }
    Ok(())
}

fn read<E: KvsEngine, W: Write>(engine: &E, keys: &[String], output: &mut W) -> Result<()> {
    write!(output, "[")?;
    for key in keys {
        match engine.get(key)? {
            Some(value) => write!(output, "({},{})", key, value)?,
            None => write!(output, "({},KVSERROR)", key)?,
        }
    }
    writeln!(output, "]")?;
    Ok(())
}

fn delete<E: KvsEngine, W: Write>(engine: &E, keys: &[String], output: &mut W) -> Result<()> {
    let mut missing = Vec::new();
    for key in keys {
        match engine.remove(key) {
            Ok(()) => {}
            Err(KvsError::KeyNotFound) => missing.push(key),
            Err(e) => return Err(e),
        }
    }
    if !missing.is_empty() {
        write!(output, "[")?;
        for key in missing {
            write!(output, "({},KVSMISSING)", key)?;
        }
        writeln!(output, "]")?;
    }
    Ok(())
}

// the snapshot is taken only once a backup slot is held
fn backup<E: KvsEngine>(engine: &E, backups: &Backups, path: PathBuf) -> Result<()> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let permit = backups.acquire()?;
    let mut snapshot = Vec::new();
    engine.dump(&mut snapshot)?;
    debug!(backup = %name, "starting backup");
    permit.run(name, move || {
        fs::write(&path, &snapshot)?;
        Ok(())
    })
}
