use crate::error::{HarnessError, HarnessResult};
use serde_json::json;

/// Parsed but not yet bound template element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Segment {
    Text(String),
    Field(String),
    Conditional { name: String, body: Vec<Segment> },
    Input(String),
}

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

pub(crate) fn parse(raw: &str) -> HarnessResult<Vec<Segment>> {
    let source = raw.strip_prefix('\n').unwrap_or(raw);
    let mut segments = Vec::new();
    // (name, body, offset of the opening directive)
    let mut open_block: Option<(String, Vec<Segment>, usize)> = None;
    let mut rest = source;
    let mut offset = 0usize;

    while let Some(start) = rest.find(OPEN) {
        let (text, tail) = rest.split_at(start);
        push_text(target(&mut segments, &mut open_block), text);
        let directive_offset = offset + start;
        let inner = tail.get(OPEN.len()..).unwrap_or_default();
        let end = find_close(inner).ok_or_else(|| {
            syntax_error("unterminated directive, missing '}}'", directive_offset, inner)
        })?;
        let body = inner.get(..end).unwrap_or_default().trim();
        let consumed = OPEN.len() + end + CLOSE.len();
        rest = tail.get(consumed..).unwrap_or_default();
        offset = directive_offset + consumed;

        match Directive::parse(body, directive_offset)? {
            Directive::Field(name) => target(&mut segments, &mut open_block).push(Segment::Field(name)),
            Directive::If(name) => {
                if let Some((outer, _, _)) = &open_block {
                    return Err(syntax_error(
                        format!("conditional '{name}' nested inside '{outer}'"),
                        directive_offset,
                        body,
                    ));
                }
                open_block = Some((name, Vec::new(), directive_offset));
            }
            Directive::End => {
                let (name, body_segments, _) = open_block.take().ok_or_else(|| {
                    syntax_error("'end' without a matching 'if'", directive_offset, body)
                })?;
                segments.push(Segment::Conditional {
                    name,
                    body: body_segments,
                });
            }
            Directive::Input(text) => {
                if let Some((name, _, _)) = &open_block {
                    return Err(syntax_error(
                        format!("input directive inside conditional '{name}'"),
                        directive_offset,
                        body,
                    ));
                }
                segments.push(Segment::Input(text));
            }
        }
    }
    push_text(target(&mut segments, &mut open_block), rest);

    if let Some((name, _, at)) = open_block {
        return Err(syntax_error(
            format!("conditional '{name}' is never closed with '{{{{end}}}}'"),
            at,
            &name,
        ));
    }
    Ok(segments)
}

fn target<'a>(
    segments: &'a mut Vec<Segment>,
    open_block: &'a mut Option<(String, Vec<Segment>, usize)>,
) -> &'a mut Vec<Segment> {
    match open_block {
        Some((_, body, _)) => body,
        None => segments,
    }
}

fn push_text(segments: &mut Vec<Segment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Text(previous)) = segments.last_mut() {
        previous.push_str(text);
    } else {
        segments.push(Segment::Text(text.to_string()));
    }
}

/// Position of the closing `}}`, skipping over double-quoted strings.
fn find_close(inner: &str) -> Option<usize> {
    let bytes = inner.as_bytes();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut index = 0;
    while let Some(&byte) = bytes.get(index) {
        if in_quotes {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_quotes = false;
            }
        } else if byte == b'"' {
            in_quotes = true;
        } else if byte == b'}' && bytes.get(index + 1) == Some(&b'}') {
            return Some(index);
        }
        index += 1;
    }
    None
}

enum Directive {
    Field(String),
    If(String),
    End,
    Input(String),
}

impl Directive {
    fn parse(body: &str, offset: usize) -> HarnessResult<Self> {
        if body.is_empty() {
            return Err(syntax_error("empty directive", offset, body));
        }
        if body == "end" {
            return Ok(Self::End);
        }
        if let Some(name) = keyword_arg(body, "if") {
            return Ok(Self::If(identifier(name, offset)?));
        }
        if let Some(arg) = keyword_arg(body, "input") {
            return Ok(Self::Input(quoted(arg, offset)?));
        }
        Ok(Self::Field(identifier(body, offset)?))
    }
}

/// `keyword <arg>`; `None` when `body` is not that keyword.
fn keyword_arg<'a>(body: &'a str, keyword: &str) -> Option<&'a str> {
    if body == keyword {
        return Some("");
    }
    let rest = body.strip_prefix(keyword)?;
    rest.starts_with(char::is_whitespace).then(|| rest.trim())
}

fn identifier(name: &str, offset: usize) -> HarnessResult<String> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid_start && valid_rest {
        Ok(name.to_string())
    } else {
        Err(syntax_error(
            format!("invalid placeholder name '{name}'"),
            offset,
            name,
        ))
    }
}

fn quoted(arg: &str, offset: usize) -> HarnessResult<String> {
    let inner = arg
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| syntax_error("input text must be a double-quoted string", offset, arg))?;
    let mut text = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped @ ('"' | '\\')) => text.push(escaped),
                Some(other) => {
                    return Err(syntax_error(
                        format!("unsupported escape '\\{other}' in input text"),
                        offset,
                        arg,
                    ))
                }
                None => return Err(syntax_error("dangling '\\' in input text", offset, arg)),
            },
            '"' => return Err(syntax_error("unescaped '\"' in input text", offset, arg)),
            other => text.push(other),
        }
    }
    Ok(text)
}

fn syntax_error(message: impl Into<String>, offset: usize, directive: &str) -> HarnessError {
    HarnessError::template(
        message,
        json!({ "offset": offset, "directive": directive }),
    )
}
