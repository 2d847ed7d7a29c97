use crossterm::style::{Color, Stylize};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use super::task::{RunState, Task};

/// Column width the title field is padded to.
pub const TITLE_WIDTH: usize = 25;
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Running,
    Success,
    Error,
}

impl Status {
    fn glyph(self, color: bool) -> String {
        if !color {
            let plain = match self {
                Status::Pending => "--",
                Status::Running => "..",
                Status::Success => "ok",
                Status::Error => "XX",
            };
            return plain.to_string();
        }
        "  ".on(self.background()).to_string()
    }

    fn background(self) -> Color {
        match self {
            Status::Pending => Color::AnsiValue(22),
            Status::Running => Color::AnsiValue(28),
            // Bright green and bright red.
            Status::Success => Color::AnsiValue(10),
            Status::Error => Color::AnsiValue(9),
        }
    }
}

/// Layout a line is drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Default,
    MidGroup,
    LastOfGroup,
    Error,
}

/// What a task looks like on screen right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayLine {
    pub status: Status,
    pub spinner: Option<char>,
    pub title: String,
    pub badge: Option<String>,
    pub message: String,
    pub bold_title: bool,
}

impl DisplayLine {
    pub fn for_task(task: &Task, frame: char, badge: Option<&str>) -> Self {
        let (status, spinner) = match task.state {
            RunState::NotStarted => (Status::Pending, None),
            RunState::Running => (Status::Running, Some(frame)),
            RunState::Complete if task.exit_code == 0 => (Status::Success, None),
            RunState::Complete => (Status::Error, None),
        };
        let message = if status == Status::Error {
            format!("exited with error ({})", task.exit_code)
        } else {
            task.last_output.clone()
        };
        Self {
            status,
            spinner,
            title: task.name.clone(),
            badge: badge.map(str::to_string),
            message,
            bold_title: false,
        }
    }

    /// Title line drawn above the children of a group.
    pub fn group_header(title: &str, badge: Option<&str>, status: Status) -> Self {
        Self {
            status,
            spinner: None,
            title: title.to_string(),
            badge: badge.map(str::to_string),
            message: String::new(),
            bold_title: true,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            spinner: None,
            title: String::new(),
            badge: None,
            message: message.into(),
            bold_title: false,
        }
    }

    /// Renders the line clamped to `width` terminal columns.
    pub fn render(&self, template: Template, width: usize, color: bool) -> String {
        let prefix_width = self.prefix(template, false).width();
        let budget = width.saturating_sub(prefix_width);
        let message = truncate(&self.message, budget);

        let mut line = self.prefix(template, color);
        if color && self.status == Status::Error {
            line.push_str(&message.red().to_string());
        } else {
            line.push_str(&message);
        }
        line
    }

    fn prefix(&self, template: Template, color: bool) -> String {
        let status = self.status.glyph(color);
        let spinner = self.spinner.unwrap_or(' ');
        match template {
            Template::Default => format!(" {status} {spinner} {}      ", self.title_field(color)),
            Template::MidGroup => format!(" {status} {spinner}  ├─ {}   ", self.title_field(color)),
            Template::LastOfGroup => {
                format!(" {status} {spinner}  └─ {}   ", self.title_field(color))
            }
            Template::Error => format!(" {status} "),
        }
    }

    fn title_field(&self, color: bool) -> String {
        let plain_width = match &self.badge {
            Some(badge) => self.title.width() + 1 + badge.width(),
            None => self.title.width(),
        };
        let mut field = if color && self.bold_title {
            self.title.as_str().bold().to_string()
        } else {
            self.title.clone()
        };
        if let Some(badge) = &self.badge {
            field.push(' ');
            if color {
                field.push_str(&badge.as_str().magenta().to_string());
            } else {
                field.push_str(badge);
            }
        }
        field.push_str(&" ".repeat(TITLE_WIDTH.saturating_sub(plain_width)));
        field
    }
}

/// Clamps `message` to `budget` terminal columns, marking the cut with an
/// ellipsis.
pub fn truncate(message: &str, budget: usize) -> String {
    if message.width() <= budget {
        return message.to_string();
    }
    if budget <= ELLIPSIS.len() {
        return take_columns(message, budget);
    }
    let mut clipped = take_columns(message, budget - ELLIPSIS.len());
    clipped.push_str(ELLIPSIS);
    clipped
}

/// Longest prefix of `text` that fits in `columns`.
fn take_columns(text: &str, columns: usize) -> String {
    let mut used = 0;
    text.chars()
        .take_while(|c| {
            used += c.width().unwrap_or(0);
            used <= columns
        })
        .collect()
}
