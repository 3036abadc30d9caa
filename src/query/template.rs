//! Query template language
//!
//! Queries are written in a compact dialect of Go's `text/template`, so a plan file
//! can carry a full search URL with the bindings spliced in:
//!
//! ```text
//! {{$.Scheme}}://{{$.HostAndPort}}/{{$.Index}}/_search?q=
//! {{- range $i, $e := .KvPairs}}{{if $i}}+AND+{{end}}{{$e.Key}}:"{{urlqueryesc $e.Value}}"{{end}}
//! ```
//!
//! Supported: text, `{{pipeline}}` actions with `{{-`/`-}}` trimming, comments,
//! field chains, variables (`$x := ..`, `$x = ..`, `$`), `if`/`else if`/`else`,
//! `range` (with optional `$i, $e :=`), parenthesized sub-pipelines, string, raw
//! string, integer and boolean literals, and the functions listed in [`FUNCTIONS`].
//! Output is not escaped.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;

use thiserror::Error;

use crate::query::extract::Binding;

/// Functions callable from a template
pub const FUNCTIONS: &[&str] = &[
    "and", "dec", "eq", "ge", "gt", "inc", "index", "le", "len", "lt", "ne", "not", "or", "urlqueryesc",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template: line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("template: exec: {0}")]
    Exec(String),
}

fn syntax(line: usize, message: impl Into<String>) -> TemplateError {
    TemplateError::Syntax {
        line,
        message: message.into(),
    }
}

fn exec(message: impl Into<String>) -> TemplateError {
    TemplateError::Exec(message.into())
}

/// Data a template is rendered against
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Record(BTreeMap<String, Value>),
}

impl Value {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Record(_) => "record",
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Self::Nil => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Str(s) => !s.is_empty(),
            Self::List(l) => !l.is_empty(),
            Self::Record(r) => !r.is_empty(),
        }
    }

    fn field(&self, name: &str) -> Result<Self, TemplateError> {
        match self {
            Self::Record(fields) => fields
                .get(name)
                .cloned()
                .ok_or_else(|| exec(format!("can't evaluate field {name} in record"))),
            Self::Nil => Err(exec(format!("nil value evaluating field {name}"))),
            other => Err(exec(format!("can't evaluate field {name} in type {}", other.kind()))),
        }
    }

    fn fields(&self, chain: &[String]) -> Result<Self, TemplateError> {
        chain.iter().try_fold(self.clone(), |value, name| value.field(name))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "<no value>"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Record(fields) => {
                write!(f, "{{")?;
                for (i, value) in fields.values().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&Binding> for Value {
    fn from(binding: &Binding) -> Self {
        Self::Record(BTreeMap::from([
            ("Key".to_string(), Self::Str(binding.key.clone())),
            ("Value".to_string(), Self::Str(binding.value.clone())),
        ]))
    }
}

/// The fixed rendering context: search endpoint parts plus the resolved bindings
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub scheme: &'a str,
    pub host_and_port: &'a str,
    pub index: &'a str,
    pub kv_pairs: &'a [Binding],
}

impl RenderContext<'_> {
    fn to_value(self) -> Value {
        Value::Record(BTreeMap::from([
            ("Scheme".to_string(), Value::Str(self.scheme.to_string())),
            ("HostAndPort".to_string(), Value::Str(self.host_and_port.to_string())),
            ("Index".to_string(), Value::Str(self.index.to_string())),
            (
                "KvPairs".to_string(),
                Value::List(self.kv_pairs.iter().map(Value::from).collect()),
            ),
        ]))
    }
}

/// A parsed template, ready to be rendered any number of times
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let segments = split_segments(source)?;
        let mut parser = Parser {
            segments: segments.into_iter(),
            scopes: vec![vec!["$".to_string()]],
        };
        let (nodes, stop) = parser.parse_list()?;
        if let Some(stop) = stop {
            return Err(syntax(stop.line(), format!("unexpected {stop}")));
        }
        Ok(Self {
            source: source.to_string(),
            nodes,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, context: RenderContext<'_>) -> Result<String, TemplateError> {
        let root = context.to_value();
        let mut exec = Exec {
            vars: vec![("$".to_string(), root.clone())],
            out: String::new(),
        };
        exec.render(&self.nodes, &root)?;
        Ok(exec.out)
    }
}

// ---------------------------------------------------------------------------
// Lexing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Dot,
    Field(Vec<String>),
    /// Field chain glued to a closing parenthesis: `(..).Value`
    Chain(Vec<String>),
    Var(String, Vec<String>),
    Ident(String),
    Str(String),
    Int(i64),
    Pipe,
    LParen,
    RParen,
    Declare,
    Assign,
    Comma,
}

#[derive(Debug)]
enum Segment {
    Text(String),
    Action { line: usize, tokens: Vec<Token> },
}

fn split_segments(source: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = source;
    let mut line = 1;
    let mut trim_next = false;

    while let Some(open) = rest.find("{{") {
        let mut text = &rest[..open];
        if trim_next {
            text = text.trim_start();
        }
        let after_open = &rest[open + 2..];
        let trim_left = after_open
            .strip_prefix('-')
            .is_some_and(|s| s.starts_with(char::is_whitespace));
        if trim_left {
            text = text.trim_end();
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text.to_string()));
        }
        line += rest[..open].matches('\n').count();

        let body = if trim_left { &after_open[1..] } else { after_open };
        let close = find_close(body).ok_or_else(|| syntax(line, "unclosed action"))?;
        let mut inner = &body[..close];
        let trim_right = inner
            .strip_suffix('-')
            .is_some_and(|s| s.ends_with(char::is_whitespace));
        if trim_right {
            inner = &inner[..inner.len() - 1];
        }

        let inner = inner.trim();
        if let Some(comment) = inner.strip_prefix("/*") {
            if !comment.ends_with("*/") {
                return Err(syntax(line, "unclosed comment"));
            }
        } else {
            let tokens = lex(inner, line)?;
            if tokens.is_empty() {
                return Err(syntax(line, "missing value for command"));
            }
            segments.push(Segment::Action { line, tokens });
        }

        line += body[..close].matches('\n').count();
        rest = &body[close + 2..];
        trim_next = trim_right;
    }

    let text = if trim_next { rest.trim_start() } else { rest };
    if !text.is_empty() {
        segments.push(Segment::Text(text.to_string()));
    }
    Ok(segments)
}

/// Byte offset of the `}}` closing an action, ignoring braces inside literals
fn find_close(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(b'"') if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'`' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

const fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

const fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lex(action: &str, line: usize) -> Result<Vec<Token>, TemplateError> {
    let chars: Vec<char> = action.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let read_ident = |i: &mut usize| -> String {
        let start = *i;
        while *i < chars.len() && is_ident_char(chars[*i]) {
            *i += 1;
        }
        chars[start..*i].iter().collect()
    };
    let read_chain = |i: &mut usize| -> Vec<String> {
        let mut chain = Vec::new();
        while *i + 1 < chars.len() && chars[*i] == '.' && is_ident_start(chars[*i + 1]) {
            *i += 1;
            let start = *i;
            while *i < chars.len() && is_ident_char(chars[*i]) {
                *i += 1;
            }
            chain.push(chars[start..*i].iter().collect());
        }
        chain
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
                let chain = read_chain(&mut i);
                if !chain.is_empty() {
                    tokens.push(Token::Chain(chain));
                }
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Declare);
                i += 2;
            }
            '=' => {
                tokens.push(Token::Assign);
                i += 1;
            }
            '.' => {
                let chain = read_chain(&mut i);
                if chain.is_empty() {
                    tokens.push(Token::Dot);
                    i += 1;
                } else {
                    tokens.push(Token::Field(chain));
                }
            }
            '$' => {
                i += 1;
                let name = read_ident(&mut i);
                let chain = read_chain(&mut i);
                tokens.push(Token::Var(format!("${name}"), chain));
            }
            '"' => {
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(syntax(line, "unterminated quoted string")),
                        Some('"') => break,
                        Some('\\') => {
                            let escaped = match chars.get(i + 1) {
                                Some('n') => '\n',
                                Some('t') => '\t',
                                Some('\\') => '\\',
                                Some('"') => '"',
                                other => {
                                    return Err(syntax(line, format!("invalid escape {other:?} in string")));
                                }
                            };
                            value.push(escaped);
                            i += 2;
                        }
                        Some(other) => {
                            value.push(*other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
                i += 1;
            }
            '`' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|c| *c == '`')
                    .ok_or_else(|| syntax(line, "unterminated raw string"))?;
                tokens.push(Token::Str(chars[start..start + end].iter().collect()));
                i = start + end + 1;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let number = literal
                    .parse::<i64>()
                    .map_err(|e| syntax(line, format!("bad number {literal}: {e}")))?;
                tokens.push(Token::Int(number));
            }
            c if is_ident_start(c) => tokens.push(Token::Ident(read_ident(&mut i))),
            other => return Err(syntax(line, format!("unexpected {other:?} in action"))),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Action(Pipeline),
    If {
        branches: Vec<(Pipeline, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    Range {
        vars: Vec<String>,
        pipeline: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

#[derive(Debug, Clone)]
enum Binder {
    Declare(String),
    Assign(String),
}

#[derive(Debug, Clone)]
struct Pipeline {
    binder: Option<Binder>,
    commands: Vec<Command>,
}

#[derive(Debug, Clone)]
struct Command {
    args: Vec<Operand>,
}

#[derive(Debug, Clone)]
enum Operand {
    Dot,
    Field(Vec<String>),
    Var(String, Vec<String>),
    Func(String),
    Literal(Value),
    Sub(Pipeline, Vec<String>),
}

/// Why a list of nodes ended
#[derive(Debug)]
enum Stop {
    End(usize),
    Else(usize),
    ElseIf(usize, Vec<Token>),
}

impl Stop {
    const fn line(&self) -> usize {
        match self {
            Self::End(line) | Self::Else(line) | Self::ElseIf(line, _) => *line,
        }
    }
}

impl fmt::Display for Stop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::End(_) => write!(f, "{{{{end}}}}"),
            Self::Else(_) | Self::ElseIf(..) => write!(f, "{{{{else}}}}"),
        }
    }
}

struct Parser {
    segments: std::vec::IntoIter<Segment>,
    /// variables visible at each nesting level
    scopes: Vec<Vec<String>>,
}

impl Parser {
    fn parse_list(&mut self) -> Result<(Vec<Node>, Option<Stop>), TemplateError> {
        let mut nodes = Vec::new();
        while let Some(segment) = self.segments.next() {
            let (line, tokens) = match segment {
                Segment::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Segment::Action { line, tokens } => (line, tokens),
            };

            match tokens.first() {
                Some(Token::Ident(word)) if word == "end" => {
                    if tokens.len() > 1 {
                        return Err(syntax(line, "unexpected tokens after end"));
                    }
                    return Ok((nodes, Some(Stop::End(line))));
                }
                Some(Token::Ident(word)) if word == "else" => {
                    let stop = match tokens.get(1) {
                        None => Stop::Else(line),
                        Some(Token::Ident(word)) if word == "if" => Stop::ElseIf(line, tokens[2..].to_vec()),
                        Some(_) => return Err(syntax(line, "expected end of else")),
                    };
                    return Ok((nodes, Some(stop)));
                }
                Some(Token::Ident(word)) if word == "if" => nodes.push(self.parse_if(line, &tokens[1..])?),
                Some(Token::Ident(word)) if word == "range" => nodes.push(self.parse_range(line, &tokens[1..])?),
                _ => nodes.push(Node::Action(self.parse_pipeline(line, &tokens)?)),
            }
        }
        Ok((nodes, None))
    }

    fn parse_block(&mut self) -> Result<(Vec<Node>, Option<Stop>), TemplateError> {
        self.scopes.push(Vec::new());
        let parsed = self.parse_list();
        self.scopes.pop();
        parsed
    }

    fn parse_if(&mut self, line: usize, tokens: &[Token]) -> Result<Node, TemplateError> {
        self.scopes.push(Vec::new());
        let mut condition = self.parse_pipeline(line, tokens)?;
        let mut branches = Vec::new();
        let mut otherwise = Vec::new();

        loop {
            let (body, stop) = self.parse_block()?;
            branches.push((condition, body));
            match stop {
                Some(Stop::End(_)) => break,
                Some(Stop::ElseIf(line, tokens)) => condition = self.parse_pipeline(line, &tokens)?,
                Some(Stop::Else(_)) => {
                    otherwise = self.parse_else_block(line)?;
                    break;
                }
                None => return Err(syntax(line, "unexpected EOF in if")),
            }
        }

        self.scopes.pop();
        Ok(Node::If { branches, otherwise })
    }

    fn parse_range(&mut self, line: usize, tokens: &[Token]) -> Result<Node, TemplateError> {
        self.scopes.push(Vec::new());

        let (vars, rest) = match tokens {
            [Token::Var(index, f1), Token::Comma, Token::Var(elem, f2), Token::Declare, rest @ ..]
                if f1.is_empty() && f2.is_empty() =>
            {
                (vec![index.clone(), elem.clone()], rest)
            }
            [Token::Var(elem, f), Token::Declare, rest @ ..] if f.is_empty() => (vec![elem.clone()], rest),
            _ => (Vec::new(), tokens),
        };
        let pipeline = self.parse_pipeline(line, rest)?;
        self.declare(line, &vars)?;

        let (body, stop) = self.parse_block()?;
        let otherwise = match stop {
            Some(Stop::End(_)) => Vec::new(),
            Some(Stop::Else(_)) => self.parse_else_block(line)?,
            Some(Stop::ElseIf(line, _)) => return Err(syntax(line, "else if is not allowed in range")),
            None => return Err(syntax(line, "unexpected EOF in range")),
        };

        self.scopes.pop();
        Ok(Node::Range {
            vars,
            pipeline,
            body,
            otherwise,
        })
    }

    fn parse_else_block(&mut self, line: usize) -> Result<Vec<Node>, TemplateError> {
        match self.parse_block()? {
            (nodes, Some(Stop::End(_))) => Ok(nodes),
            (_, Some(stop)) => Err(syntax(stop.line(), format!("unexpected {stop} after else"))),
            (_, None) => Err(syntax(line, "unexpected EOF after else")),
        }
    }

    fn declare(&mut self, line: usize, names: &[String]) -> Result<(), TemplateError> {
        for name in names {
            if name == "$" {
                return Err(syntax(line, "cannot redeclare $"));
            }
            if let Some(scope) = self.scopes.last_mut() {
                scope.push(name.clone());
            }
        }
        Ok(())
    }

    fn is_defined(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.iter().any(|v| v == name))
    }

    fn parse_pipeline(&mut self, line: usize, tokens: &[Token]) -> Result<Pipeline, TemplateError> {
        let (binder, rest) = match tokens {
            [Token::Var(name, f), Token::Declare, rest @ ..] if f.is_empty() => {
                (Some(Binder::Declare(name.clone())), rest)
            }
            [Token::Var(name, f), Token::Assign, rest @ ..] if f.is_empty() => {
                if !self.is_defined(name) {
                    return Err(syntax(line, format!("undefined variable: {name}")));
                }
                (Some(Binder::Assign(name.clone())), rest)
            }
            _ => (None, tokens),
        };

        let mut cursor = Cursor { tokens: rest, pos: 0 };
        let commands = self.parse_commands(line, &mut cursor, false)?;
        if let Some(token) = cursor.peek() {
            return Err(syntax(line, format!("unexpected {token:?} in pipeline")));
        }

        // the variable becomes visible after its own declaration
        if let Some(Binder::Declare(name)) = &binder {
            self.declare(line, std::slice::from_ref(name))?;
        }

        Ok(Pipeline { binder, commands })
    }

    fn parse_commands(
        &self,
        line: usize,
        cursor: &mut Cursor<'_>,
        in_parens: bool,
    ) -> Result<Vec<Command>, TemplateError> {
        let mut commands = Vec::new();
        loop {
            let mut args = Vec::new();
            while let Some(token) = cursor.peek() {
                match token {
                    Token::Pipe => break,
                    Token::RParen if in_parens => break,
                    Token::RParen => return Err(syntax(line, "unexpected right paren")),
                    _ => args.push(self.parse_operand(line, cursor)?),
                }
            }
            if args.is_empty() {
                return Err(syntax(line, "missing value for command"));
            }
            commands.push(Command { args });

            if cursor.peek() == Some(&Token::Pipe) {
                cursor.pos += 1;
            } else {
                return Ok(commands);
            }
        }
    }

    fn parse_operand(&self, line: usize, cursor: &mut Cursor<'_>) -> Result<Operand, TemplateError> {
        let Some(token) = cursor.next() else {
            return Err(syntax(line, "missing operand"));
        };
        let operand = match token {
            Token::Dot => Operand::Dot,
            Token::Field(chain) => Operand::Field(chain.clone()),
            Token::Var(name, chain) => {
                if !self.is_defined(name) {
                    return Err(syntax(line, format!("undefined variable: {name}")));
                }
                Operand::Var(name.clone(), chain.clone())
            }
            Token::Ident(word) => match word.as_str() {
                "true" => Operand::Literal(Value::Bool(true)),
                "false" => Operand::Literal(Value::Bool(false)),
                name if FUNCTIONS.contains(&name) => Operand::Func(name.to_string()),
                name => return Err(syntax(line, format!("function \"{name}\" not defined"))),
            },
            Token::Str(s) => Operand::Literal(Value::Str(s.clone())),
            Token::Int(i) => Operand::Literal(Value::Int(*i)),
            Token::LParen => {
                let commands = self.parse_commands(line, cursor, true)?;
                if cursor.next() != Some(&Token::RParen) {
                    return Err(syntax(line, "unclosed left paren"));
                }
                let chain = match cursor.peek() {
                    Some(Token::Chain(chain)) => {
                        let chain = chain.clone();
                        cursor.pos += 1;
                        chain
                    }
                    _ => Vec::new(),
                };
                Operand::Sub(
                    Pipeline {
                        binder: None,
                        commands,
                    },
                    chain,
                )
            }
            other => return Err(syntax(line, format!("unexpected {other:?} in operand"))),
        };
        Ok(operand)
    }
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

struct Exec {
    vars: Vec<(String, Value)>,
    out: String,
}

impl Exec {
    fn render(&mut self, nodes: &[Node], dot: &Value) -> Result<(), TemplateError> {
        let mark = self.vars.len();
        for node in nodes {
            match node {
                Node::Text(text) => self.out.push_str(text),
                Node::Action(pipeline) => {
                    let value = self.eval_pipeline(pipeline, dot)?;
                    if pipeline.binder.is_none() {
                        let _ = write!(self.out, "{value}");
                    }
                }
                Node::If { branches, otherwise } => self.render_if(branches, otherwise, dot)?,
                Node::Range {
                    vars,
                    pipeline,
                    body,
                    otherwise,
                } => self.render_range(vars, pipeline, body, otherwise, dot)?,
            }
        }
        self.vars.truncate(mark);
        Ok(())
    }

    fn render_if(
        &mut self,
        branches: &[(Pipeline, Vec<Node>)],
        otherwise: &[Node],
        dot: &Value,
    ) -> Result<(), TemplateError> {
        let mark = self.vars.len();
        let mut taken = false;
        for (condition, body) in branches {
            if self.eval_pipeline(condition, dot)?.truthy() {
                self.render(body, dot)?;
                taken = true;
                break;
            }
        }
        if !taken {
            self.render(otherwise, dot)?;
        }
        self.vars.truncate(mark);
        Ok(())
    }

    fn render_range(
        &mut self,
        vars: &[String],
        pipeline: &Pipeline,
        body: &[Node],
        otherwise: &[Node],
        dot: &Value,
    ) -> Result<(), TemplateError> {
        let mark = self.vars.len();
        let items: Vec<(Value, Value)> = match self.eval_pipeline(pipeline, dot)? {
            Value::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (Value::Int(i64::try_from(i).unwrap_or(i64::MAX)), item))
                .collect(),
            Value::Nil => Vec::new(),
            other => return Err(exec(format!("range can't iterate over {}", other.kind()))),
        };

        if items.is_empty() {
            self.render(otherwise, dot)?;
        }
        for (key, item) in items {
            let iteration = self.vars.len();
            match vars {
                [elem] => self.vars.push((elem.clone(), item.clone())),
                [index, elem] => {
                    self.vars.push((index.clone(), key));
                    self.vars.push((elem.clone(), item.clone()));
                }
                _ => {}
            }
            self.render(body, &item)?;
            self.vars.truncate(iteration);
        }

        self.vars.truncate(mark);
        Ok(())
    }

    fn eval_pipeline(&mut self, pipeline: &Pipeline, dot: &Value) -> Result<Value, TemplateError> {
        let mut piped = None;
        for command in &pipeline.commands {
            piped = Some(self.eval_command(command, dot, piped)?);
        }
        let value = piped.unwrap_or(Value::Nil);

        match &pipeline.binder {
            Some(Binder::Declare(name)) => self.vars.push((name.clone(), value.clone())),
            Some(Binder::Assign(name)) => {
                let slot = self
                    .vars
                    .iter_mut()
                    .rev()
                    .find(|(var, _)| var == name)
                    .ok_or_else(|| exec(format!("undefined variable: {name}")))?;
                slot.1 = value.clone();
            }
            None => {}
        }
        Ok(value)
    }

    fn eval_command(&mut self, command: &Command, dot: &Value, piped: Option<Value>) -> Result<Value, TemplateError> {
        match command.args.as_slice() {
            [Operand::Func(name), rest @ ..] => {
                let mut args = rest
                    .iter()
                    .map(|arg| self.eval_operand(arg, dot))
                    .collect::<Result<Vec<_>, _>>()?;
                args.extend(piped);
                call(name, args)
            }
            [single] if piped.is_none() => self.eval_operand(single, dot),
            _ => Err(exec("can't give argument to non-function")),
        }
    }

    fn eval_operand(&mut self, operand: &Operand, dot: &Value) -> Result<Value, TemplateError> {
        match operand {
            Operand::Dot => Ok(dot.clone()),
            Operand::Field(chain) => dot.fields(chain),
            Operand::Var(name, chain) => self
                .vars
                .iter()
                .rev()
                .find(|(var, _)| var == name)
                .ok_or_else(|| exec(format!("undefined variable: {name}")))?
                .1
                .fields(chain),
            Operand::Func(name) => call(name, Vec::new()),
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Sub(pipeline, chain) => self.eval_pipeline(pipeline, dot)?.fields(chain),
        }
    }
}

fn arity(name: &str, args: &[Value], want: usize) -> Result<(), TemplateError> {
    if args.len() == want {
        Ok(())
    } else {
        Err(exec(format!(
            "wrong number of args for {name}: want {want} got {}",
            args.len()
        )))
    }
}

fn int_arg(name: &str, value: &Value) -> Result<i64, TemplateError> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(exec(format!("{name}: expected int, got {}", other.kind()))),
    }
}

fn compare(name: &str, a: &Value, b: &Value) -> Result<Ordering, TemplateError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) if name == "eq" || name == "ne" => Ok(x.cmp(y)),
        _ => Err(exec(format!(
            "{name}: incompatible types for comparison: {} and {}",
            a.kind(),
            b.kind()
        ))),
    }
}

fn call(name: &str, args: Vec<Value>) -> Result<Value, TemplateError> {
    match name {
        "inc" | "dec" => {
            arity(name, &args, 1)?;
            let i = int_arg(name, &args[0])?;
            let result = if name == "inc" { i.checked_add(1) } else { i.checked_sub(1) };
            result
                .map(Value::Int)
                .ok_or_else(|| exec(format!("{name}: integer overflow")))
        }
        "urlqueryesc" => {
            arity(name, &args, 1)?;
            match &args[0] {
                Value::Str(s) => Ok(Value::Str(path_escape(s))),
                other => Err(exec(format!("urlqueryesc: expected string, got {}", other.kind()))),
            }
        }
        "index" => {
            let (collection, indices) = args
                .split_first()
                .ok_or_else(|| exec("wrong number of args for index: want at least 1 got 0"))?;
            indices.iter().try_fold(collection.clone(), |item, index| match (item, index) {
                (Value::List(items), Value::Int(i)) => usize::try_from(*i)
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .ok_or_else(|| exec(format!("index out of range: {i}"))),
                (Value::Record(fields), Value::Str(key)) => Ok(fields.get(key).cloned().unwrap_or(Value::Nil)),
                (Value::Nil, _) => Err(exec("index of untyped nil")),
                (other, index) => Err(exec(format!(
                    "can't index item of type {} with {}",
                    other.kind(),
                    index.kind()
                ))),
            })
        }
        "len" => {
            arity(name, &args, 1)?;
            let len = match &args[0] {
                Value::Str(s) => s.len(),
                Value::List(items) => items.len(),
                Value::Record(fields) => fields.len(),
                other => return Err(exec(format!("len of type {}", other.kind()))),
            };
            Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
        }
        "eq" => {
            let (first, rest) = args
                .split_first()
                .filter(|(_, rest)| !rest.is_empty())
                .ok_or_else(|| exec("wrong number of args for eq: want at least 2"))?;
            for other in rest {
                if compare(name, first, other)? == Ordering::Equal {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "ne" | "lt" | "le" | "gt" | "ge" => {
            arity(name, &args, 2)?;
            let ordering = compare(name, &args[0], &args[1])?;
            Ok(Value::Bool(match name {
                "ne" => ordering != Ordering::Equal,
                "lt" => ordering == Ordering::Less,
                "le" => ordering != Ordering::Greater,
                "gt" => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        "and" | "or" => {
            let want_truthy = name == "or";
            let last = args.len().checked_sub(1).ok_or_else(|| exec(format!("{name}: missing arguments")))?;
            let position = args
                .iter()
                .position(|arg| arg.truthy() == want_truthy)
                .unwrap_or(last);
            Ok(args.into_iter().nth(position).unwrap_or(Value::Nil))
        }
        "not" => {
            arity(name, &args, 1)?;
            Ok(Value::Bool(!args[0].truthy()))
        }
        other => Err(exec(format!("function \"{other}\" not defined"))),
    }
}

/// Percent-escapes `s` for use as a single URL path segment (Go's `url.PathEscape`)
pub fn path_escape(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut escaped = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        let keep = b.is_ascii_alphanumeric()
            || matches!(b, b'-' | b'_' | b'.' | b'~' | b'$' | b'&' | b'+' | b':' | b'=' | b'@');
        if keep {
            escaped.push(char::from(b));
        } else {
            escaped.push('%');
            escaped.push(char::from(HEX[usize::from(b >> 4)]));
            escaped.push(char::from(HEX[usize::from(b & 0x0F)]));
        }
    }
    escaped
}
