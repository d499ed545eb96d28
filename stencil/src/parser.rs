//! Turns a token stream into a node tree by dispatching every block tag
//! through the registry assembled from the engine's libraries.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use stencil_parser::lexer::{Token, TokenKind};
use stencil_parser::ParseError;

use crate::engine::Engine;
use crate::expr::FilterExpression;
use crate::library::{FilterDef, Library, TagCompiler};
use crate::loader::Origin;
use crate::node::{Node, NodeList};
use crate::tags::CycleNode;

pub struct Parser {
    /// Remaining tokens, reversed so the next one pops off the end.
    tokens: Vec<Token>,
    tags: HashMap<String, TagCompiler>,
    filters: HashMap<String, FilterDef>,

    /// Open block tags, newest last, for unclosed-tag diagnostics.
    command_stack: Vec<(String, usize)>,

    /// Cycle nodes registered with `as name`, shared with later
    /// references to the same name.
    pub(crate) named_cycles: HashMap<String, Arc<CycleNode>>,
    pub(crate) last_cycle: Option<Arc<CycleNode>>,

    /// Block names seen so far, for duplicate detection.
    pub(crate) seen_blocks: HashSet<String>,

    pub(crate) origin: Option<Arc<Origin>>,
    pub(crate) engine: Option<Engine>,
}

impl Parser {
    pub fn new(
        mut tokens: Vec<Token>,
        builtins: &[Library],
        engine: Option<Engine>,
        origin: Option<Arc<Origin>>,
    ) -> Self {
        tokens.reverse();
        let mut merged = Library::new();
        for library in builtins {
            merged.extend(library);
        }
        Self {
            tokens,
            tags: merged.tags,
            filters: merged.filters,
            command_stack: Vec::new(),
            named_cycles: HashMap::new(),
            last_cycle: None,
            seen_blocks: HashSet::new(),
            origin,
            engine,
        }
    }

    /// Parses until one of `until` opens a block tag, leaving that token
    /// in the stream for the caller to consume. With an empty `until`,
    /// parses to the end of the stream.
    pub fn parse(&mut self, until: &[&str]) -> Result<NodeList, ParseError> {
        let mut nodelist = NodeList::default();
        let mut contains_nontext = false;
        while let Some(token) = self.next_token() {
            match token.kind {
                TokenKind::Text => {
                    nodelist.nodes.push(Node::Text(token.contents));
                }
                TokenKind::Comment => {}
                TokenKind::Var => {
                    let expr = self.compile_filter_at(&token.contents, token.lineno)?;
                    contains_nontext = true;
                    nodelist
                        .nodes
                        .push(Node::Variable(crate::node::VariableNode { expr }));
                }
                TokenKind::Block => {
                    let bits = token.split_contents();
                    let Some(command) = bits.first() else {
                        return Err(ParseError::new(
                            format!("Empty block tag on line {}", token.lineno),
                            token.lineno,
                            "",
                        ));
                    };
                    if until.contains(&command.as_str()) {
                        self.prepend_token(token);
                        return Ok(nodelist);
                    }
                    let Some(compiler) = self.tags.get(command.as_str()).cloned() else {
                        return Err(self.invalid_block_tag(&token, command, until));
                    };
                    let command = command.clone();
                    self.command_stack.push((command, token.lineno));
                    let node = compiler(self, &token)?;
                    self.command_stack.pop();
                    if node.must_be_first() && contains_nontext {
                        return Err(ParseError::new(
                            format!(
                                "'{}' must be the first tag in the template",
                                token.contents
                            ),
                            token.lineno,
                            &token.contents,
                        ));
                    }
                    contains_nontext = true;
                    nodelist.nodes.push(node);
                }
            }
        }
        if let Some((command, lineno)) = self.command_stack.last() {
            if !until.is_empty() {
                return Err(ParseError::new(
                    format!(
                        "Unclosed tag on line {lineno}: '{command}'. Looking for one of: {}.",
                        until.join(", ")
                    ),
                    *lineno,
                    command,
                ));
            }
        }
        Ok(nodelist)
    }

    fn invalid_block_tag(&self, token: &Token, command: &str, until: &[&str]) -> ParseError {
        let message = if until.is_empty() {
            format!(
                "Invalid block tag on line {}: '{command}'. \
                 Did you forget to register or load this tag?",
                token.lineno
            )
        } else {
            format!(
                "Invalid block tag on line {}: '{command}', expected {}. \
                 Did you forget to register or load this tag?",
                token.lineno,
                until.join(" or ")
            )
        };
        ParseError::new(message, token.lineno, &token.contents)
    }

    pub fn next_token(&mut self) -> Option<Token> {
        self.tokens.pop()
    }

    pub fn prepend_token(&mut self, token: Token) {
        self.tokens.push(token);
    }

    /// Drops the pending token; used after `parse(until)` to consume the
    /// closing tag.
    pub fn delete_first_token(&mut self) {
        self.tokens.pop();
    }

    /// Throws tokens away until `endtag` opens a block tag. Nested tags
    /// are not honored; this is the `comment` tag's behavior.
    pub fn skip_past(&mut self, endtag: &str) -> Result<(), ParseError> {
        while let Some(token) = self.next_token() {
            if token.kind == TokenKind::Block && token.split_contents().first().map(String::as_str) == Some(endtag)
            {
                return Ok(());
            }
        }
        Err(ParseError::new(
            format!("Unclosed tag: looking for '{endtag}'"),
            0,
            endtag,
        ))
    }

    /// Compiles a `var|filter:arg` token against the active registry.
    pub fn compile_filter(&self, token: &str) -> Result<FilterExpression, ParseError> {
        FilterExpression::new(token, self)
    }

    fn compile_filter_at(&self, token: &str, lineno: usize) -> Result<FilterExpression, ParseError> {
        FilterExpression::new(token, self)
            .map_err(|err| ParseError::new(err.message(), lineno, token))
    }

    pub fn find_filter(&self, name: &str) -> Result<FilterDef, ParseError> {
        self.filters
            .get(name)
            .cloned()
            .ok_or_else(|| ParseError::new(format!("Invalid filter: '{name}'"), 0, name))
    }

    /// Brings a library's tags and filters into scope, as `{% load %}`
    /// does.
    pub fn add_library(&mut self, library: &Library) {
        for (name, compiler) in &library.tags {
            self.tags.insert(name.clone(), compiler.clone());
        }
        for (name, def) in &library.filters {
            self.filters.insert(name.clone(), def.clone());
        }
    }
}
