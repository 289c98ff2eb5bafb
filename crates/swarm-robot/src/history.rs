//! [`CommandHistory`] – bounded log of the commands a robot has executed.
//!
//! Newest first.  Once [`CommandHistory::CAPACITY`] entries are held, each
//! insertion evicts the oldest one.  The history is seeded with a `start`
//! command so that [`CommandHistory::head`] always has something to compare a
//! candidate against.
//!
//! # Example
//!
//! ```rust
//! use swarm_robot::history::CommandHistory;
//! use swarm_types::Command;
//!
//! let mut history = CommandHistory::new();
//! assert_eq!(history.head(), &Command::start());
//!
//! history.add(Command::new("dx", Some(50.0)));
//! assert_eq!(history.head(), &Command::new("dx", Some(50.0)));
//! ```

use std::collections::VecDeque;

use swarm_types::Command;

#[derive(Debug, Clone)]
pub struct CommandHistory {
    /// Front is the most recent command.
    entries: VecDeque<Command>,
    sentinel: Command,
}

impl CommandHistory {
    /// Maximum number of commands retained.
    pub const CAPACITY: usize = 20;

    /// A history holding only the seed `start` command.
    pub fn new() -> Self {
        let mut entries = VecDeque::with_capacity(Self::CAPACITY);
        entries.push_front(Command::start());
        Self {
            entries,
            sentinel: Command::start(),
        }
    }

    /// Record `command` as the most recent one, evicting the oldest entry when
    /// the history is full.
    pub fn add(&mut self, command: Command) {
        self.entries.push_front(command);
        self.entries.truncate(Self::CAPACITY);
    }

    /// The most recently executed command, or `start` when nothing is held.
    pub fn head(&self) -> &Command {
        self.entries.front().unwrap_or(&self.sentinel)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.entries.iter()
    }
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new()
    }
}
