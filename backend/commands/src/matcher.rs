/// Greedy longest-match command resolution with a fuzzy fallback.
use std::sync::Arc;

use crate::registry::CommandRegistry;
use crate::similarity::jaro_winkler;
use crate::tokenizer::normalize;
use crate::types::{Command, Syntax};

/// A resolved command invocation.
#[derive(Debug, Clone)]
pub struct Match {
    pub command: Arc<Command>,
    pub syntax: Syntax,
    /// Raw tokens after the matched syntax.
    pub args: Vec<String>,
}

/// No syntax matched. `suggestion` is `None` only when nothing is registered.
#[derive(Debug, Clone, PartialEq)]
pub struct NoMatch {
    pub suggestion: Option<String>,
}

/// Resolve `tokens` against the registry, comparing syntax tokens starting
/// at `offset` (the index just past the address token).
///
/// A syntax qualifies only when it is shorter than the whole token list, so
/// there is always room for the address token in front of it.
pub fn match_tokens(
    registry: &CommandRegistry,
    tokens: &[String],
    offset: usize,
    bot_name: &str,
) -> Result<Match, NoMatch> {
    let input: Vec<String> = tokens.iter().map(|t| normalize(t)).collect();

    for entry in registry.entries() {
        let syntax = &entry.syntax;
        if syntax.len() >= tokens.len() {
            continue;
        }
        let matched = syntax
            .tokens()
            .iter()
            .enumerate()
            .all(|(i, tok)| input.get(offset + i).is_some_and(|t| *t == normalize(tok)));
        if matched {
            let args = tokens
                .get(offset + syntax.len()..)
                .map(<[String]>::to_vec)
                .unwrap_or_default();
            return Ok(Match {
                command: Arc::clone(&entry.command),
                syntax: syntax.clone(),
                args,
            });
        }
    }

    Err(NoMatch {
        suggestion: suggest(registry, &input, offset)
            .map(|syntax| format!("Did you mean \"{bot_name} {syntax}\"?")),
    })
}

/// Closest syntax by Jaro-Winkler over the input prefix of the same token
/// count as each candidate. The first best score in match order wins ties.
pub fn suggest<'a>(
    registry: &'a CommandRegistry,
    normalized: &[String],
    offset: usize,
) -> Option<&'a Syntax> {
    let rest = normalized.get(offset..).unwrap_or_default();

    let mut best: Option<(&Syntax, f64)> = None;
    for syntax in registry.all_syntaxes() {
        let prefix = rest
            .iter()
            .take(syntax.len())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        let score = jaro_winkler(&prefix, &syntax.key());
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((syntax, score));
        }
    }
    best.map(|(syntax, _)| syntax)
}
