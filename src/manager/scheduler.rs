use std::{
    io::{self, Write},
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};
use log::{debug, info, warn};

use crate::app::{interrupt, renderer::Renderer, spinner::Spinner};
use crate::models::{
    line::{DisplayLine, Status, Template},
    message::TaskEvent,
    task::{RunState, Task},
};
use crate::worker::{
    cancel::CancelFlag,
    worker::{spawn_runner, Job},
};

/// Default ceiling on concurrently running commands.
pub const MAX_PARALLEL_CMDS: usize = 4;
pub const SPINNER_INTERVAL: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub max_parallel: usize,
    pub show_steps: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_parallel: MAX_PARALLEL_CMDS,
            show_steps: true,
        }
    }
}

/// Outcome of one top-level step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    pub succeeded: bool,
    pub exit_codes: Vec<i32>,
    pub admission_order: Vec<usize>,
    pub peak_running: usize,
    pub failed_task: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
    pub cancelled: bool,
    pub interrupted: bool,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        !self.cancelled && self.steps.iter().all(|step| step.succeeded)
    }

    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            130
        } else if self.succeeded() {
            0
        } else {
            1
        }
    }
}

enum Wake {
    Tick,
    Event(TaskEvent),
    Closed,
}

/// Runs steps one after another, the units of each step in parallel up to
/// the configured ceiling.
///
/// All task state changes and all drawing happen on the thread calling
/// [`Scheduler::run`]; runner threads only talk to it through the event bus.
pub struct Scheduler<W: Write> {
    renderer: Renderer<W>,
    options: RunOptions,
    cancel: CancelFlag,
    interrupted: fn() -> bool,
}

impl<W: Write> Scheduler<W> {
    pub fn new(renderer: Renderer<W>, options: RunOptions) -> Self {
        Self {
            renderer,
            options: RunOptions {
                max_parallel: options.max_parallel.max(1),
                ..options
            },
            cancel: CancelFlag::new(),
            interrupted: interrupt::interrupted,
        }
    }

    #[cfg(test)]
    pub fn with_interrupt_check(mut self, interrupted: fn() -> bool) -> Self {
        self.interrupted = interrupted;
        self
    }

    #[cfg(test)]
    pub fn renderer(&self) -> &Renderer<W> {
        &self.renderer
    }

    pub fn run(&mut self, steps: &mut [Task]) -> io::Result<RunReport> {
        self.renderer.start()?;
        let total = steps.len();
        let mut report = RunReport::default();

        for (idx, step) in steps.iter_mut().enumerate() {
            let step_report = self.process(step, idx + 1, total)?;
            report.steps.push(step_report);
            if self.cancel.is_raised() {
                info!("Run cancelled after step {} of {}", idx + 1, total);
                report.cancelled = true;
                break;
            }
        }

        report.interrupted = (self.interrupted)();
        if report.interrupted {
            self.renderer.notice(&DisplayLine::error("Interrupted"))?;
        } else if report.cancelled {
            if let Some(name) = report.steps.last().and_then(|step| step.failed_task.as_deref()) {
                let message = format!("Stopped: `{}` failed and stop-on-failure is set", name);
                self.renderer.notice(&DisplayLine::error(message))?;
            }
        }
        Ok(report)
    }

    fn process(&mut self, step: &mut Task, number: usize, total: usize) -> io::Result<StepReport> {
        let badge = self
            .options
            .show_steps
            .then(|| format!("〔{}/{}〕", number, total));
        let is_group = step.is_group();
        let title = step.name.clone();
        let unit_badge = if is_group { None } else { badge.as_deref() };

        let units = step.units_mut();
        let unit_count = units.len();
        info!("Step {}/{}: {} ({} unit(s))", number, total, title, unit_count);

        let mut spinner = Spinner::new();
        let header = is_group
            .then(|| DisplayLine::group_header(&title, badge.as_deref(), Status::Running));
        self.renderer.begin_step(header.as_ref())?;
        for unit in units.iter() {
            self.draw(unit, unit_badge, spinner.current())?;
        }

        let (bus, events): (Sender<TaskEvent>, Receiver<TaskEvent>) = unbounded();
        let ticker = tick(SPINNER_INTERVAL);
        let mut report = StepReport {
            succeeded: true,
            ..StepReport::default()
        };
        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
        let mut next = 0;
        let mut running = 0;

        while next < unit_count && running < self.options.max_parallel {
            in_flight.push(self.admit(&units[next], next, &bus));
            report.admission_order.push(next);
            next += 1;
            running += 1;
        }
        report.peak_running = running;
        // Only held while there is something left to admit, so the bus
        // disconnects if every runner goes away without reporting.
        let mut bus = (next < unit_count).then_some(bus);

        while running > 0 {
            let wake = select! {
                recv(ticker) -> _ => Wake::Tick,
                recv(events) -> event => event.map_or(Wake::Closed, Wake::Event),
            };
            match wake {
                Wake::Tick => {
                    if (self.interrupted)() && !self.cancel.is_raised() {
                        warn!("Interrupted, stopping the run");
                        self.cancel.raise();
                    }
                    let frame = spinner.next();
                    for unit in units.iter().filter(|unit| unit.is_running()) {
                        self.draw(unit, unit_badge, frame)?;
                    }
                }
                Wake::Event(event) => {
                    let idx = event.task();
                    let unit = &mut units[idx];
                    let finished = matches!(event, TaskEvent::Finished { .. });
                    match event {
                        TaskEvent::Started { .. } => unit.state = RunState::Running,
                        TaskEvent::Output { text, .. } => unit.last_output = text,
                        TaskEvent::Finished { exit_code, .. } => {
                            unit.state = RunState::Complete;
                            unit.exit_code = exit_code;
                            running -= 1;
                            if exit_code != 0 {
                                report.succeeded = false;
                                if unit.stop_on_failure && report.failed_task.is_none() {
                                    report.failed_task = Some(unit.name.clone());
                                    self.cancel.raise();
                                }
                            }
                        }
                    }
                    self.draw(&units[idx], unit_badge, spinner.current())?;

                    // A freed slot goes to the next queued unit straight away.
                    if finished && !self.cancel.is_raised() {
                        if let Some(sender) = &bus {
                            in_flight.push(self.admit(&units[next], next, sender));
                            report.admission_order.push(next);
                            next += 1;
                            running += 1;
                            report.peak_running = report.peak_running.max(running);
                            if next == unit_count {
                                bus = None;
                            }
                        }
                    }
                }
                Wake::Closed => {
                    warn!("{} runner(s) went away without reporting", running);
                    report.succeeded = false;
                    break;
                }
            }
            // Runners raise the flag just before publishing `Finished`, so
            // hold on until that failure has been applied and drawn.
            if self.cancel.is_raised()
                && (report.failed_task.is_some() || (self.interrupted)())
            {
                break;
            }
        }

        if running == 0 {
            for handle in in_flight {
                if handle.join().is_err() {
                    warn!("A runner thread panicked");
                }
            }
        } else {
            debug!("Leaving {} unit(s) running unobserved", running);
            report.succeeded = false;
        }

        report.exit_codes = units.iter().map(|unit| unit.exit_code).collect();
        if is_group {
            let status = if report.succeeded {
                Status::Success
            } else {
                Status::Error
            };
            let summary = DisplayLine::group_header(&title, badge.as_deref(), status);
            self.renderer.display(-1, &summary, Template::Default)?;
        }
        self.renderer.finish_step(unit_count)?;
        Ok(report)
    }

    fn admit(&self, unit: &Task, idx: usize, bus: &Sender<TaskEvent>) -> JoinHandle<()> {
        let job = Job {
            task: idx,
            argv: unit.argv().into_iter().map(str::to_string).collect(),
            stop_on_failure: unit.stop_on_failure,
        };
        debug!("Admitting unit {}: {}", idx, job.command_line());
        spawn_runner(job, bus.clone(), self.cancel.clone())
    }

    fn draw(&mut self, unit: &Task, badge: Option<&str>, frame: char) -> io::Result<()> {
        let line = DisplayLine::for_task(unit, frame, badge);
        self.renderer.display(unit.line_idx as isize, &line, unit.template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use crate::models::task::{TaskKind, NOT_FINISHED};

    fn scheduler(max_parallel: usize, show_steps: bool) -> Scheduler<Vec<u8>> {
        let renderer = Renderer::new(Vec::new(), Some(100), false);
        Scheduler::new(
            renderer,
            RunOptions {
                max_parallel,
                show_steps,
            },
        )
    }

    fn group(commands: &[&str], stop_on_failure: bool) -> Task {
        let children = commands
            .iter()
            .map(|cmd| Task::command(None, *cmd, stop_on_failure))
            .collect();
        Task::group(Some("group".into()), children, stop_on_failure)
    }

    fn screen(scheduler: &Scheduler<Vec<u8>>) -> String {
        String::from_utf8_lossy(scheduler.renderer().output()).into_owned()
    }

    #[test]
    fn small_group_runs_entirely_in_parallel() {
        let mut steps = vec![group(&["sleep 0.3", "sleep 0.3", "sleep 0.3"], true)];
        let mut scheduler = scheduler(MAX_PARALLEL_CMDS, true);
        let report = scheduler.run(&mut steps).unwrap();

        let step = &report.steps[0];
        assert!(step.succeeded);
        assert_eq!(step.peak_running, 3);
        assert_eq!(step.admission_order, vec![0, 1, 2]);
        assert_eq!(step.exit_codes, vec![0, 0, 0]);
        assert_eq!(report.exit_code(), 0);
        assert!(screen(&scheduler).contains(" ok   group 〔1/1〕"));
    }

    #[test]
    fn ceiling_bounds_running_units() {
        let commands = ["sleep 0.1"; 6];
        let mut steps = vec![group(&commands, true)];
        let mut scheduler = scheduler(2, false);
        let report = scheduler.run(&mut steps).unwrap();

        let step = &report.steps[0];
        assert_eq!(step.peak_running, 2);
        assert_eq!(step.admission_order, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(step.exit_codes, vec![0; 6]);
        assert!(report.succeeded());
    }

    #[test]
    fn zero_ceiling_still_makes_progress() {
        let mut steps = vec![group(&["true", "true"], true)];
        let mut scheduler = scheduler(0, false);
        let report = scheduler.run(&mut steps).unwrap();
        assert_eq!(report.steps[0].peak_running, 1);
        assert!(report.succeeded());
    }

    #[test]
    fn one_failing_child_fails_the_group() {
        let mut steps = vec![group(&["true", "false", "true"], false)];
        let mut scheduler = scheduler(MAX_PARALLEL_CMDS, false);
        let report = scheduler.run(&mut steps).unwrap();

        let step = &report.steps[0];
        assert!(!step.succeeded);
        assert_eq!(step.exit_codes, vec![0, 1, 0]);
        assert!(!report.cancelled);
        assert_eq!(report.exit_code(), 1);

        let out = screen(&scheduler);
        assert!(out.contains("exited with error (1)"));
        assert!(out.contains(" XX   group"));
    }

    #[test]
    fn stop_on_failure_prevents_later_steps() {
        let mut steps = vec![
            Task::command(Some("broken".into()), "ls /definitely/not/here", true),
            Task::command(None, "true", true),
        ];
        let mut scheduler = scheduler(MAX_PARALLEL_CMDS, true);
        let report = scheduler.run(&mut steps).unwrap();

        assert!(report.cancelled);
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].failed_task.as_deref(), Some("broken"));
        assert_ne!(report.exit_code(), 0);
        assert_eq!(steps[1].state, RunState::NotStarted);
        assert_eq!(steps[1].exit_code, NOT_FINISHED);
        assert!(screen(&scheduler).contains("Stopped: `broken` failed"));
    }

    #[test]
    fn failures_without_stop_keep_going() {
        let mut steps = vec![
            Task::command(None, "false", false),
            Task::command(None, "true", false),
        ];
        let mut scheduler = scheduler(MAX_PARALLEL_CMDS, true);
        let report = scheduler.run(&mut steps).unwrap();

        assert_eq!(report.steps.len(), 2);
        assert!(!report.steps[0].succeeded);
        assert!(report.steps[1].succeeded);
        assert_eq!(report.exit_code(), 1);
        assert!(screen(&scheduler).contains("true 〔2/2〕"));
    }

    #[test]
    fn cancellation_stops_admitting_queued_units() {
        let mut steps = vec![group(&["false", "sleep 0.2", "true", "true"], true)];
        let mut scheduler = scheduler(1, false);
        let report = scheduler.run(&mut steps).unwrap();

        assert!(report.cancelled);
        assert_eq!(report.steps[0].admission_order, vec![0]);
        assert_eq!(report.steps[0].exit_codes[1..], [NOT_FINISHED; 3]);
    }

    #[test]
    fn interrupt_stops_the_run_and_reports_130() {
        let mut steps = vec![
            group(&["sleep 2", "sleep 2"], false),
            Task::command(None, "true", false),
        ];
        let mut scheduler = scheduler(MAX_PARALLEL_CMDS, false).with_interrupt_check(|| true);
        let started = Instant::now();
        let report = scheduler.run(&mut steps).unwrap();

        assert!(started.elapsed() < Duration::from_millis(1500));
        assert!(report.interrupted);
        assert!(report.cancelled);
        assert_eq!(report.steps.len(), 1);
        assert!(!report.steps[0].succeeded);
        assert_eq!(report.exit_code(), 130);
        assert_eq!(steps[1].state, RunState::NotStarted);
        assert!(screen(&scheduler).contains(" XX Interrupted"));
    }

    #[test]
    fn exit_code_precedence() {
        let ok = RunReport {
            steps: vec![StepReport {
                succeeded: true,
                ..StepReport::default()
            }],
            ..RunReport::default()
        };
        assert_eq!(ok.exit_code(), 0);
        let cancelled = RunReport {
            cancelled: true,
            ..ok.clone()
        };
        assert_eq!(cancelled.exit_code(), 1);
        let interrupted = RunReport {
            interrupted: true,
            ..cancelled
        };
        assert_eq!(interrupted.exit_code(), 130);
    }

    #[test]
    fn rows_stay_put_across_a_run() {
        let mut steps = vec![group(&["echo a", "echo b", "echo c"], true)];
        let mut scheduler = scheduler(2, false);
        scheduler.run(&mut steps).unwrap();

        let TaskKind::Group(children) = &steps[0].kind else {
            panic!("expected a group");
        };
        let rows: Vec<_> = children.iter().map(|child| child.line_idx).collect();
        assert_eq!(rows, vec![0, 1, 2]);
        assert_eq!(children[2].last_output, "c");
        // Parked below the group, back in step-relative coordinates.
        assert_eq!(scheduler.renderer().row(), 3);
    }

    #[test]
    fn long_output_is_clamped_to_the_terminal() {
        let word = "w".repeat(300);
        let mut steps = vec![Task::command(Some("noisy".into()), format!("echo {}", word), true)];
        let mut scheduler = scheduler(MAX_PARALLEL_CMDS, false);
        scheduler.run(&mut steps).unwrap();

        let out = screen(&scheduler);
        let drawn: Vec<&str> = out
            .split('\n')
            .filter_map(|line| line.rsplit("\x1b[2K").next())
            .filter(|line| line.contains("www"))
            .collect();
        assert!(!drawn.is_empty());
        for line in drawn {
            assert!(line.ends_with("..."), "not truncated: {line}");
            assert_eq!(line.chars().count(), 100);
        }
    }
}
