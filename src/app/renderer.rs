use std::io::{self, Write};

use crossterm::{
    cursor::{Hide, MoveDown, MoveToColumn, MoveUp, Show},
    execute, queue,
    style::Print,
    terminal::{self, Clear, ClearType},
};
use log::debug;

use crate::models::line::{DisplayLine, Template};

/// Width used when the terminal cannot be queried.
pub const DEFAULT_WIDTH: usize = 80;

/// Sole writer of the dashboard.
///
/// Rows are relative to the first unit line of the current step: a group
/// header sits at row -1, units at `0..n`. The renderer tracks which row the
/// cursor is on and only ever moves it relative to that, so no absolute
/// screen addressing is needed. The cursor is always left in column 0.
pub struct Renderer<W: Write> {
    out: W,
    row: isize,
    width: Option<usize>,
    color: bool,
}

impl<W: Write> Renderer<W> {
    /// `width` pins the line width; `None` queries the terminal on every draw.
    pub fn new(out: W, width: Option<usize>, color: bool) -> Self {
        Self {
            out,
            row: 0,
            width,
            color,
        }
    }

    pub fn start(&mut self) -> io::Result<()> {
        execute!(self.out, Hide)
    }

    /// Plain line written before the dashboard takes over.
    pub fn announce(&mut self, text: &str) -> io::Result<()> {
        queue!(self.out, Print(text), Print("\n"), MoveToColumn(0))?;
        self.out.flush()
    }

    /// Opens a new step at the current cursor position.
    pub fn begin_step(&mut self, header: Option<&DisplayLine>) -> io::Result<()> {
        self.row = 0;
        if let Some(header) = header {
            self.row = -1;
            self.display(-1, header, Template::Default)?;
        }
        Ok(())
    }

    /// Repaints `row` with `line` and leaves the cursor on the row below.
    pub fn display(
        &mut self,
        row: isize,
        line: &DisplayLine,
        template: Template,
    ) -> io::Result<()> {
        self.move_to(row)?;
        let text = line.render(template, self.width(), self.color);
        queue!(
            self.out,
            Clear(ClearType::CurrentLine),
            Print(text),
            Print("\n"),
            MoveToColumn(0)
        )?;
        self.row += 1;
        self.out.flush()
    }

    /// Parks the cursor directly below the last of `units` lines.
    pub fn finish_step(&mut self, units: usize) -> io::Result<()> {
        self.move_to(units as isize)?;
        self.out.flush()
    }

    /// Error line written at the cursor, below everything drawn so far.
    pub fn notice(&mut self, line: &DisplayLine) -> io::Result<()> {
        self.display(self.row(), line, Template::Error)
    }

    pub fn row(&self) -> isize {
        self.row
    }

    #[cfg(test)]
    pub fn output(&self) -> &W {
        &self.out
    }

    fn width(&self) -> usize {
        if let Some(width) = self.width {
            return width;
        }
        match terminal::size() {
            Ok((0, _)) => DEFAULT_WIDTH,
            Ok((columns, _)) => usize::from(columns),
            Err(e) => {
                debug!("Cannot query terminal width, using {}: {}", DEFAULT_WIDTH, e);
                DEFAULT_WIDTH
            }
        }
    }

    fn move_to(&mut self, row: isize) -> io::Result<()> {
        let moves = self.row - row;
        let count = u16::try_from(moves.unsigned_abs()).unwrap_or(u16::MAX);
        if moves > 0 {
            queue!(self.out, MoveUp(count))?;
        } else if moves < 0 {
            queue!(self.out, MoveDown(count))?;
        }
        self.row = row;
        Ok(())
    }
}

impl<W: Write> Drop for Renderer<W> {
    fn drop(&mut self) {
        let _ = execute!(self.out, Show);
    }
}
