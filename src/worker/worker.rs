use std::{
    io::{self, BufRead, BufReader, Read},
    process::{Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
};

use crossbeam_channel::{never, select, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::models::message::TaskEvent;
use crate::worker::cancel::CancelFlag;

/// Exit code reported when the program does not exist.
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit code reported when the program exists but cannot be executed.
pub const EXIT_NOT_EXECUTABLE: i32 = 126;
/// Exit code reported for any other failure to start or reap the process.
pub const EXIT_SPAWN_FAILED: i32 = 1;

/// Everything a runner thread needs to know about one unit.
#[derive(Debug, Clone)]
pub struct Job {
    pub task: usize,
    pub argv: Vec<String>,
    pub stop_on_failure: bool,
}

impl Job {
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

pub fn spawn_runner(job: Job, bus: Sender<TaskEvent>, cancel: CancelFlag) -> JoinHandle<()> {
    thread::spawn(move || run(job, &bus, &cancel))
}

/// Runs one unit to completion, publishing its lifecycle onto `bus`.
///
/// `Started` is always sent first and `Finished` last, after every output
/// line of the process has been relayed.
pub fn run(job: Job, bus: &Sender<TaskEvent>, cancel: &CancelFlag) {
    info!("Starting task {}: {}", job.task, job.command_line());
    publish(bus, TaskEvent::Started { task: job.task });

    let exit_code = match execute(&job, bus) {
        Ok(code) => code,
        Err(e) => {
            error!("Failed to run `{}`: {}", job.command_line(), e);
            failure_code(&e)
        }
    };

    if exit_code != 0 && job.stop_on_failure {
        warn!("Task {} failed with {}, stopping the run", job.task, exit_code);
        cancel.raise();
    }
    info!("Task {} finished with {}", job.task, exit_code);
    publish(
        bus,
        TaskEvent::Finished {
            task: job.task,
            exit_code,
        },
    );
}

fn execute(job: &Job, bus: &Sender<TaskEvent>) -> io::Result<i32> {
    let (program, args) = job
        .argv
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    debug!("Task {} spawned as pid {}", job.task, child.id());

    let stdout = child.stdout.take().map(read_pipe);
    let stderr = child.stderr.take().map(read_pipe);
    let relay = {
        let bus = bus.clone();
        let task = job.task;
        thread::spawn(move || relay_output(task, stdout, stderr, &bus))
    };

    let status = child.wait()?;
    if relay.join().is_err() {
        error!("Output relay for task {} panicked", job.task);
    }
    Ok(decode_exit_status(status))
}

/// Reads `pipe` line by line on its own thread, forwarding cleaned lines.
fn read_pipe<R: Read + Send + 'static>(pipe: R) -> Receiver<String> {
    let (sender, receiver) = unbounded();
    thread::spawn(move || {
        for line in BufReader::new(pipe).split(b'\n') {
            let Ok(bytes) = line else { break };
            if sender.send(clean_line(&String::from_utf8_lossy(&bytes))).is_err() {
                break;
            }
        }
    });
    receiver
}

enum Relayed {
    Line(String),
    Stdout,
    Stderr,
}

/// Moves lines from either stream onto the bus, one line per select cycle,
/// until both streams are closed.
fn relay_output(
    task: usize,
    stdout: Option<Receiver<String>>,
    stderr: Option<Receiver<String>>,
    bus: &Sender<TaskEvent>,
) {
    let mut open = usize::from(stdout.is_some()) + usize::from(stderr.is_some());
    let mut stdout = stdout.unwrap_or_else(never);
    let mut stderr = stderr.unwrap_or_else(never);

    while open > 0 {
        let relayed = select! {
            recv(stdout) -> msg => msg.map_or(Relayed::Stdout, Relayed::Line),
            recv(stderr) -> msg => msg.map_or(Relayed::Stderr, Relayed::Line),
        };
        match relayed {
            Relayed::Line(text) => publish(bus, TaskEvent::Output { task, text }),
            Relayed::Stdout => {
                stdout = never();
                open -= 1;
            }
            Relayed::Stderr => {
                stderr = never();
                open -= 1;
            }
        }
    }
}

fn publish(bus: &Sender<TaskEvent>, event: TaskEvent) {
    if let Err(e) = bus.send(event) {
        // The dispatch loop stops listening once the run is cancelled.
        debug!("Dropped event, nobody is listening: {:?}", e.into_inner());
    }
}

fn failure_code(e: &io::Error) -> i32 {
    match e.kind() {
        io::ErrorKind::NotFound => EXIT_NOT_FOUND,
        io::ErrorKind::PermissionDenied => EXIT_NOT_EXECUTABLE,
        _ => EXIT_SPAWN_FAILED,
    }
}

/// Normal exits keep their code; a process killed by a signal reports
/// 128 + the signal number.
#[cfg(unix)]
pub fn decode_exit_status(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    let raw = status.into_raw();
    if libc::WIFEXITED(raw) {
        libc::WEXITSTATUS(raw)
    } else if libc::WIFSIGNALED(raw) {
        128 + libc::WTERMSIG(raw)
    } else {
        EXIT_SPAWN_FAILED
    }
}

#[cfg(not(unix))]
pub fn decode_exit_status(status: ExitStatus) -> i32 {
    status.code().unwrap_or(EXIT_SPAWN_FAILED)
}

/// Strips terminal escape sequences and control characters from one line
/// of output. When a line was redrawn with carriage returns only the final
/// redraw is kept.
pub fn clean_line(line: &str) -> String {
    let line = line.trim_end_matches('\r');
    let line = line.rsplit('\r').next().unwrap_or(line);

    let mut cleaned = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.next() {
                // CSI: parameters and intermediates up to a final byte.
                Some('[') => {
                    for c in chars.by_ref() {
                        if ('\x40'..='\x7e').contains(&c) {
                            break;
                        }
                    }
                }
                // OSC: terminated by BEL or ST.
                Some(']') => {
                    while let Some(c) = chars.next() {
                        if c == '\x07' {
                            break;
                        }
                        if c == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            },
            '\t' => cleaned.push(' '),
            c if c.is_control() => {}
            c => cleaned.push(c),
        }
    }
    cleaned
}
