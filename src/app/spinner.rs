const FRAMES: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

#[derive(Debug, Default)]
pub struct Spinner {
    pos: usize,
}

impl Spinner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> char {
        FRAMES[self.pos]
    }

    pub fn next(&mut self) -> char {
        self.pos = (self.pos + 1) % FRAMES.len();
        self.current()
    }
}
