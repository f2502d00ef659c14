use super::Error;

/// Credit accounting for one subscription stream.
///
/// `requested` is the number of events the server still owes. Every event consumed spends one
/// unit; whenever the balance drops below `appetite` a refill of `appetite` is due, so the
/// server is never left without credit while the stream is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowWindow {
    requested: i32,
    appetite: i32,
}

impl FlowWindow {
    /// Creates a closed window.
    pub fn new(appetite: i32) -> Self {
        Self {
            requested: 0,
            appetite,
        }
    }

    /// Resets the window for a new stream and returns the initial request size.
    pub fn open(&mut self) -> i32 {
        self.requested = self.appetite;
        self.appetite
    }

    /// Events the server still owes.
    pub fn requested(&self) -> i32 {
        self.requested
    }

    /// Batch size of each request.
    pub fn appetite(&self) -> i32 {
        self.appetite
    }

    /// Spends one unit of credit for a received event.
    ///
    /// When `replenish` is set and the balance falls below the appetite, the refill is added
    /// immediately and its size returned; the caller must send it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if the server sent an event it had no credit for,
    /// or if the refill would overflow the outstanding credit.
    pub fn consume(&mut self, replenish: bool) -> Result<Option<i32>, Error> {
        if self.requested <= 0 {
            return Err(Error::ProtocolViolation(
                "server delivered an event without outstanding credit".to_string(),
            ));
        }
        self.requested -= 1;

        if replenish && self.requested < self.appetite {
            self.requested = self.requested.checked_add(self.appetite).ok_or_else(|| {
                Error::ProtocolViolation(format!(
                    "credit overflow: {} outstanding plus refill of {}",
                    self.requested, self.appetite
                ))
            })?;
            return Ok(Some(self.appetite));
        }
        Ok(None)
    }
}
