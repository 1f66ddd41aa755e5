/// Read cursor of the analyzer, looping inside `[loop_start, loop_end)`.
#[derive(Clone, Debug)]
pub struct Transport {
    position: f64,
    loop_start: f64,
    loop_end: f64,
}

impl Transport {
    pub fn new(loop_start: f64, loop_end: f64) -> Self {
        let mut transport = Self {
            position: loop_start,
            loop_start,
            loop_end,
        };
        transport.set_loop(loop_start, loop_end);
        transport.position = transport.loop_start;
        transport
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn loop_bounds(&self) -> (f64, f64) {
        (self.loop_start, self.loop_end)
    }

    pub fn loop_length(&self) -> f64 {
        self.loop_end - self.loop_start
    }

    /// Bounds take effect at the next wrap; the current position is left alone.
    pub fn set_loop(&mut self, loop_start: f64, loop_end: f64) {
        let (start, end) = if loop_end < loop_start {
            (loop_end, loop_start)
        } else {
            (loop_start, loop_end)
        };
        self.loop_start = start.max(0.0);
        self.loop_end = end.max(self.loop_start);
    }

    pub fn reset(&mut self) {
        self.position = self.loop_start;
    }

    /// Move by `delta` seconds and wrap back into the loop.
    pub fn advance(&mut self, delta: f64) -> f64 {
        self.position += delta;
        self.wrap();
        self.position
    }

    /// Wrap by repeated addition/subtraction of the loop length, so large
    /// overshoots land where they would have with small steps.
    fn wrap(&mut self) {
        let length = self.loop_length();
        if !(length > 0.0) || !self.position.is_finite() {
            self.position = self.loop_start;
            return;
        }
        if self.position >= self.loop_end {
            let overshoot = ((self.position - self.loop_end) / length).floor();
            self.position -= (overshoot + 1.0) * length;
            while self.position >= self.loop_end {
                self.position -= length;
            }
        }
        if self.position < self.loop_start {
            let undershoot = ((self.loop_start - self.position) / length).floor();
            self.position += undershoot * length;
            while self.position < self.loop_start {
                self.position += length;
            }
        }
        // Float residue can leave us exactly on the end after adding back.
        if self.position >= self.loop_end {
            self.position = self.loop_start;
        }
    }
}
