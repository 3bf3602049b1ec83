/// Command model: syntaxes, role requirements, and the handler contract.
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use opbot_core::InboundMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bot::BotHandle;
use crate::tokenizer::{normalize, tokenize};

/// Deduplicated roles resolved for the sender of one message.
pub type RoleSet = BTreeSet<String>;

// ---------------------------------------------------------------------------
// Syntax
// ---------------------------------------------------------------------------

/// An ordered sequence of literal tokens a command answers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "SyntaxRepr", into = "Vec<String>")]
pub struct Syntax {
    tokens: Vec<String>,
}

impl Syntax {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .flat_map(|t| tokenize(t.as_ref()))
                .collect(),
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Normalized form used for deduplication and fuzzy scoring.
    pub fn key(&self) -> String {
        self.tokens
            .iter()
            .map(|t| normalize(t))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens.join(" "))
    }
}

impl From<&str> for Syntax {
    fn from(text: &str) -> Self {
        Self::new([text])
    }
}

impl From<String> for Syntax {
    fn from(text: String) -> Self {
        Self::new([text])
    }
}

impl From<Vec<&str>> for Syntax {
    fn from(tokens: Vec<&str>) -> Self {
        Self::new(tokens)
    }
}

impl<const N: usize> From<[&str; N]> for Syntax {
    fn from(tokens: [&str; N]) -> Self {
        Self::new(tokens)
    }
}

impl From<Syntax> for Vec<String> {
    fn from(syntax: Syntax) -> Self {
        syntax.tokens
    }
}

/// A syntax is written either as one string or as a token list.
#[derive(Deserialize)]
#[serde(untagged)]
enum SyntaxRepr {
    Text(String),
    Tokens(Vec<String>),
}

impl From<SyntaxRepr> for Syntax {
    fn from(repr: SyntaxRepr) -> Self {
        match repr {
            SyntaxRepr::Text(text) => Syntax::from(text),
            SyntaxRepr::Tokens(tokens) => Syntax::new(tokens),
        }
    }
}

// ---------------------------------------------------------------------------
// Role requirement
// ---------------------------------------------------------------------------

/// OR-of-ANDs role requirement.
///
/// Each group lists roles that must all be held; the requirement is met when
/// any one group is. Serialized as `[["A", "B"], "D"]`, where a bare string
/// is a single-role group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<RoleSpec>", into = "Vec<RoleSpec>")]
pub struct RoleRequirement {
    groups: Vec<BTreeSet<String>>,
}

impl RoleRequirement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group whose roles must all be held.
    pub fn all_of<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.push(roles.into_iter().map(Into::into).collect());
        self
    }

    /// Add a single-role group.
    pub fn role(self, role: impl Into<String>) -> Self {
        self.all_of([role.into()])
    }

    pub fn groups(&self) -> &[BTreeSet<String>] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn is_satisfied_by(&self, roles: &RoleSet) -> bool {
        self.groups.iter().any(|group| group.is_subset(roles))
    }
}

impl fmt::Display for RoleRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups: Vec<String> = self
            .groups
            .iter()
            .map(|g| g.iter().cloned().collect::<Vec<_>>().join(" + "))
            .collect();
        f.write_str(&groups.join(" or "))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RoleSpec {
    One(String),
    All(Vec<String>),
}

impl From<Vec<RoleSpec>> for RoleRequirement {
    fn from(specs: Vec<RoleSpec>) -> Self {
        specs
            .into_iter()
            .fold(RoleRequirement::new(), |req, spec| match spec {
                RoleSpec::One(role) => req.role(role),
                RoleSpec::All(roles) => req.all_of(roles),
            })
    }
}

impl From<RoleRequirement> for Vec<RoleSpec> {
    fn from(req: RoleRequirement) -> Self {
        req.groups
            .into_iter()
            .map(|group| {
                if group.len() == 1 {
                    RoleSpec::One(group.into_iter().next().unwrap_or_default())
                } else {
                    RoleSpec::All(group.into_iter().collect())
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Handler contract
// ---------------------------------------------------------------------------

/// Everything a command body gets to see besides its partition state.
pub struct CommandContext<'a> {
    pub message: &'a InboundMessage,
    /// The syntax that matched.
    pub syntax: &'a Syntax,
    /// Raw tokens following the matched syntax.
    pub args: &'a [String],
    pub roles: &'a RoleSet,
    pub bot: &'a BotHandle,
}

impl CommandContext<'_> {
    /// Arguments joined back into one string.
    pub fn raw_args(&self) -> String {
        self.args.join(" ")
    }
}

/// What a command body produced. A `text` reply is posted to the channel the
/// message came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResponse {
    pub text: Option<String>,
}

impl CommandResponse {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }

    pub fn silent() -> Self {
        Self::default()
    }
}

/// The body of a command.
///
/// `state` is the command's partition, recovered from the persister before
/// the call and saved after a successful return. Mutations made before an
/// error are discarded.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, ctx: &CommandContext<'_>, state: &mut Value) -> Result<CommandResponse>;
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A registered command.
pub struct Command {
    pub name: String,
    pub description: String,
    pub syntaxes: Vec<Syntax>,
    pub roles: Option<RoleRequirement>,
    pub partition: String,
    pub handler: Arc<dyn CommandHandler>,
}

impl Command {
    pub fn builder(name: impl Into<String>, handler: impl CommandHandler + 'static) -> CommandBuilder {
        let name = name.into();
        CommandBuilder {
            partition: name.clone(),
            name,
            description: String::new(),
            syntaxes: Vec::new(),
            roles: None,
            handler: Arc::new(handler),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("syntaxes", &self.syntaxes)
            .field("roles", &self.roles)
            .field("partition", &self.partition)
            .finish_non_exhaustive()
    }
}

pub struct CommandBuilder {
    name: String,
    description: String,
    syntaxes: Vec<Syntax>,
    roles: Option<RoleRequirement>,
    partition: String,
    handler: Arc<dyn CommandHandler>,
}

impl CommandBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn syntax(mut self, syntax: impl Into<Syntax>) -> Self {
        self.syntaxes.push(syntax.into());
        self
    }

    /// An empty requirement is treated as no requirement.
    pub fn roles(mut self, roles: RoleRequirement) -> Self {
        self.roles = (!roles.is_empty()).then_some(roles);
        self
    }

    /// Defaults to the command name.
    pub fn partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    /// Without any explicit syntax the command answers to its own name.
    pub fn build(self) -> Command {
        let syntaxes = if self.syntaxes.is_empty() {
            vec![Syntax::from(self.name.as_str())]
        } else {
            self.syntaxes
        };
        Command {
            name: self.name,
            description: self.description,
            syntaxes,
            roles: self.roles,
            partition: self.partition,
            handler: self.handler,
        }
    }
}
