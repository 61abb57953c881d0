//! Batched command builder
//!
//! Commands are queued locally and sent in a single round trip. Each `push`
//! returns the slot index of its reply in the vector `exec` hands back.
//! Arguments are kept as bytes, so key names from SCAN go back out unchanged.

use std::io;

use super::control_plane::ControlPlane;
use crate::utils::RespValue;

#[derive(Debug, Default)]
pub struct Pipeline {
    commands: Vec<Vec<Vec<u8>>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
        }
    }

    /// Queue a command and return the index of its reply
    pub fn push<I, S>(&mut self, args: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.commands
            .push(args.into_iter().map(|a| a.as_ref().to_vec()).collect());
        self.commands.len() - 1
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Send all queued commands and drain the queue
    ///
    /// An empty pipeline performs no round trip.
    pub fn exec<C: ControlPlane + ?Sized>(&mut self, conn: &mut C) -> io::Result<Vec<RespValue>> {
        if self.commands.is_empty() {
            return Ok(Vec::new());
        }
        let commands = std::mem::take(&mut self.commands);
        let replies = conn.execute_pipeline(&commands)?;
        if replies.len() != commands.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "pipeline returned {} replies for {} commands",
                    replies.len(),
                    commands.len()
                ),
            ));
        }
        Ok(replies)
    }
}
