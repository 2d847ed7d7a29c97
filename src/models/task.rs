use super::line::Template;

/// Exit code held by a task that has not finished yet.
pub const NOT_FINISHED: i32 = -1;

/// Names derived from commands longer than this are shortened.
pub const MAX_DERIVED_NAME: usize = 25;
const DERIVED_NAME_KEEP: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Complete,
}

#[derive(Debug, Clone)]
pub enum TaskKind {
    Command(String),
    Group(Vec<Task>),
}

#[derive(Debug, Clone)]
pub struct Task {
    pub name: String,
    pub kind: TaskKind,
    pub stop_on_failure: bool,
    pub template: Template,
    pub line_idx: usize,
    pub state: RunState,
    pub last_output: String,
    pub exit_code: i32,
}

impl Task {
    pub fn command(name: Option<String>, cmd: impl Into<String>, stop_on_failure: bool) -> Self {
        let cmd = cmd.into();
        let name = name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| derive_name(&cmd));
        Self {
            name,
            kind: TaskKind::Command(cmd),
            stop_on_failure,
            template: Template::Default,
            line_idx: 0,
            state: RunState::NotStarted,
            last_output: String::new(),
            exit_code: NOT_FINISHED,
        }
    }

    /// Builds a group; children get their line index from declaration order.
    pub fn group(name: Option<String>, mut children: Vec<Task>, stop_on_failure: bool) -> Self {
        for (idx, child) in children.iter_mut().enumerate() {
            child.line_idx = idx;
        }
        let name = name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("parallel ({} tasks)", children.len()));
        Self {
            name,
            kind: TaskKind::Group(children),
            stop_on_failure,
            template: Template::Default,
            line_idx: 0,
            state: RunState::NotStarted,
            last_output: String::new(),
            exit_code: NOT_FINISHED,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, TaskKind::Group(_))
    }

    pub fn command_line(&self) -> Option<&str> {
        match &self.kind {
            TaskKind::Command(cmd) => Some(cmd),
            TaskKind::Group(_) => None,
        }
    }

    /// Program and arguments. Split on whitespace only: no quoting, globbing
    /// or variable expansion is performed.
    pub fn argv(&self) -> Vec<&str> {
        self.command_line()
            .map(|cmd| cmd.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Expands the step into its runnable units and prepares them for a run.
    ///
    /// A command step is its own single unit and keeps the default template;
    /// a group yields its children, each connected to the group header with
    /// a mid-group or last-of-group template.
    pub fn units_mut(&mut self) -> &mut [Task] {
        if !self.is_group() {
            self.template = Template::Default;
            self.reset();
            return std::slice::from_mut(self);
        }
        match &mut self.kind {
            TaskKind::Group(children) => {
                let last = children.len().saturating_sub(1);
                for (idx, child) in children.iter_mut().enumerate() {
                    child.template = if idx == last {
                        Template::LastOfGroup
                    } else {
                        Template::MidGroup
                    };
                    child.reset();
                }
                children
            }
            TaskKind::Command(_) => &mut [],
        }
    }

    pub fn reset(&mut self) {
        self.state = RunState::NotStarted;
        self.last_output.clear();
        self.exit_code = NOT_FINISHED;
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }
}

/// Title used for a task declared without a name.
pub fn derive_name(cmd: &str) -> String {
    if cmd.chars().count() > MAX_DERIVED_NAME {
        let mut name: String = cmd.chars().take(DERIVED_NAME_KEEP).collect();
        name.push_str("...");
        name
    } else {
        cmd.to_string()
    }
}
