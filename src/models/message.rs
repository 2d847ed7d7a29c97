/// Events published onto the event bus by process runners.
///
/// `task` is the index of the unit within the step currently being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Started { task: usize },
    Output { task: usize, text: String },
    Finished { task: usize, exit_code: i32 },
}

impl TaskEvent {
    pub fn task(&self) -> usize {
        match self {
            TaskEvent::Started { task }
            | TaskEvent::Output { task, .. }
            | TaskEvent::Finished { task, .. } => *task,
        }
    }
}
