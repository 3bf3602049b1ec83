/// Command registry.
///
/// Holds every registered command and a flat list of syntax entries kept in
/// descending token-count order, so the matcher can walk it front to back
/// and the most specific syntax wins. Equal-length syntaxes keep their
/// registration order.
use std::collections::HashSet;
use std::sync::Arc;

use opbot_persist::validate_partition;
use tracing::{debug, warn};

use crate::types::{Command, Syntax};

/// One accepted syntax and the command it resolves to.
#[derive(Debug, Clone)]
pub struct SyntaxEntry {
    pub syntax: Syntax,
    pub command: Arc<Command>,
}

#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: Vec<Arc<Command>>,
    entries: Vec<SyntaxEntry>,
    keys: HashSet<String>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_commands(commands: impl IntoIterator<Item = Command>) -> Self {
        let mut registry = Self::new();
        for command in commands {
            registry.register(command);
        }
        registry
    }

    /// Register a command. A syntax already claimed by an earlier command is
    /// dropped with a warning; the first registration keeps it. A command
    /// whose partition no persister can store is skipped entirely.
    pub fn register(&mut self, command: Command) -> Option<Arc<Command>> {
        if let Err(e) = validate_partition(&command.partition) {
            warn!(command = %command.name, error = %e, "Skipping command with unusable partition");
            return None;
        }
        let command = Arc::new(command);

        for syntax in &command.syntaxes {
            if syntax.is_empty() {
                warn!(command = %command.name, "Ignoring empty syntax");
                continue;
            }
            if !self.keys.insert(syntax.key()) {
                warn!(
                    command = %command.name,
                    syntax = %syntax,
                    "Duplicate syntax, keeping the earlier registration"
                );
                continue;
            }

            // Insert after every entry at least as long: descending length,
            // stable within a length.
            let pos = self
                .entries
                .iter()
                .position(|e| e.syntax.len() < syntax.len())
                .unwrap_or(self.entries.len());
            self.entries.insert(
                pos,
                SyntaxEntry {
                    syntax: syntax.clone(),
                    command: Arc::clone(&command),
                },
            );
        }

        debug!(command = %command.name, partition = %command.partition, "Registered command");
        self.commands.push(Arc::clone(&command));
        Some(command)
    }

    /// Deduplicated syntaxes in match order.
    pub fn all_syntaxes(&self) -> impl Iterator<Item = &Syntax> {
        self.entries.iter().map(|e| &e.syntax)
    }

    pub fn entries(&self) -> &[SyntaxEntry] {
        &self.entries
    }

    pub fn commands(&self) -> &[Arc<Command>] {
        &self.commands
    }

    pub fn find(&self, name: &str) -> Option<&Arc<Command>> {
        self.commands.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
