//! Textual persisted form
//!
//! Grammar (one simulator per document):
//!
//! ```text
//! Simulator    := FolderRecord
//! FolderRecord := '[' Name ';' CTime ';' MTime ';' Perm ']' '{' Entry* '}'
//! Entry        := FolderRecord | FileRecord
//! FileRecord   := '(' Name ';' CTime ';' MTime ';' Perm ')' '"' Content '"'
//! Content      := (EscapedChar)*
//! EscapedChar  := any non-reserved byte | '\' followed by exactly one byte
//! ```
//!
//! Reserved bytes inside content are escaped with a preceding `\`; the byte
//! after a `\` is always taken literally. Import parses into a fresh
//! [`Simulator`] and hands it back only on a full parse, so a failure never
//! disturbs the caller's live tree.

use crate::config::SimConfig;
use crate::error::{Result, SimError};
use crate::simulator::Simulator;
use crate::tree::{NodeId, NodeKind};
use std::io::Write;
use tracing::warn;

/// Bytes with structural meaning in the persisted form, forbidden
/// unescaped in names and content.
pub const RESERVED: [u8; 9] = *b";[]()\"\\{}";

pub fn is_reserved(byte: u8) -> bool {
    RESERVED.contains(&byte)
}

/// Serialize the whole tree, root record first.
pub fn export<W: Write>(sim: &Simulator, out: &mut W) -> Result<()> {
    write_folder(sim, sim.root_id(), out)
}

fn write_folder<W: Write>(sim: &Simulator, id: NodeId, out: &mut W) -> Result<()> {
    let meta = &sim.node(id).meta;
    write!(
        out,
        "[{};{};{};{}]{{",
        meta.name,
        meta.ctime,
        meta.mtime,
        meta.mode.bits()
    )?;
    for &child in sim.children_of(id) {
        match sim.node(child).kind {
            NodeKind::Folder { .. } => write_folder(sim, child, out)?,
            NodeKind::File { .. } => write_file(sim, child, out)?,
        }
    }
    out.write_all(b"}")?;
    Ok(())
}

fn write_file<W: Write>(sim: &Simulator, id: NodeId, out: &mut W) -> Result<()> {
    let meta = &sim.node(id).meta;
    write!(
        out,
        "({};{};{};{})\"",
        meta.name,
        meta.ctime,
        meta.mtime,
        meta.mode.bits()
    )?;
    for &byte in sim.content(id)? {
        if is_reserved(byte) {
            out.write_all(b"\\")?;
        }
        out.write_all(&[byte])?;
    }
    out.write_all(b"\"")?;
    Ok(())
}

/// Parse a saved document into a fresh simulator built with `config`.
pub fn import(input: &[u8], config: SimConfig) -> Result<Simulator> {
    let mut sim = Simulator::new(config);
    let mut parser = Parser { input, pos: 0 };

    let (name, ctime, mtime, mode) = parser.record_header(b'[', b']')?;
    sim.raw_set_root_attrs(&name, ctime, mtime, mode);
    parser.expect(b'{')?;
    parser.entries(&mut sim)?;
    parser.expect(b'}')?;
    if parser.pos != input.len() {
        warn!(
            trailing = input.len() - parser.pos,
            "trailing bytes after saved tree"
        );
    }
    Ok(sim)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn err<T>(&self, msg: impl Into<String>) -> Result<T> {
        Err(SimError::Parse {
            offset: self.pos,
            msg: msg.into(),
        })
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek();
        if byte.is_some() {
            self.pos += 1;
        }
        byte
    }

    fn expect(&mut self, want: u8) -> Result<()> {
        match self.bump() {
            Some(got) if got == want => Ok(()),
            Some(got) => Err(SimError::Parse {
                offset: self.pos - 1,
                msg: format!("expected {:?}, found {:?}", want as char, got as char),
            }),
            None => self.err(format!("expected {:?}, found end of input", want as char)),
        }
    }

    /// `open Name ';' CTime ';' MTime ';' Perm close` for both record kinds.
    fn record_header(&mut self, open: u8, close: u8) -> Result<(String, i64, i64, u8)> {
        self.expect(open)?;
        let name = self.name(b';')?;
        self.expect(b';')?;
        let ctime = self.number(b';')?;
        self.expect(b';')?;
        let mtime = self.number(b';')?;
        self.expect(b';')?;
        let perm = self.number(close)?;
        self.expect(close)?;
        Ok((name, ctime, mtime, (perm & 0o7) as u8))
    }

    fn name(&mut self, terminator: u8) -> Result<String> {
        let start = self.pos;
        loop {
            match self.peek() {
                None => return self.err("end of input inside a name"),
                Some(byte) if byte == terminator => break,
                Some(byte) if is_reserved(byte) => {
                    return self.err(format!("reserved character {:?} in name", byte as char))
                }
                Some(_) => self.pos += 1,
            }
        }
        match String::from_utf8(self.input[start..self.pos].to_vec()) {
            Ok(name) => Ok(name),
            Err(_) => Err(SimError::Parse {
                offset: start,
                msg: "name is not valid UTF-8".to_string(),
            }),
        }
    }

    fn number(&mut self, terminator: u8) -> Result<i64> {
        let mut value: i64 = 0;
        let mut digits = 0usize;
        loop {
            match self.peek() {
                None => return self.err("end of input inside a number"),
                Some(byte) if byte == terminator => break,
                Some(byte @ b'0'..=b'9') => {
                    value = match value
                        .checked_mul(10)
                        .and_then(|v| v.checked_add(i64::from(byte - b'0')))
                    {
                        Some(v) => v,
                        None => return self.err("number out of range"),
                    };
                    digits += 1;
                    self.pos += 1;
                }
                Some(byte) => {
                    return self.err(format!("non-digit {:?} in number", byte as char))
                }
            }
        }
        if digits == 0 {
            return self.err("empty number");
        }
        Ok(value)
    }

    fn content(&mut self) -> Result<Vec<u8>> {
        self.expect(b'"')?;
        let mut out = Vec::new();
        loop {
            match self.bump() {
                None => return self.err("end of input inside content"),
                Some(b'"') => break,
                Some(b'\\') => match self.bump() {
                    Some(byte) => out.push(byte),
                    None => return self.err("dangling escape at end of input"),
                },
                Some(byte) if is_reserved(byte) => {
                    return self.err(format!(
                        "unescaped reserved character {:?} in content",
                        byte as char
                    ))
                }
                Some(byte) => out.push(byte),
            }
        }
        Ok(out)
    }

    /// `Entry*` up to (but not consuming) the closing `}`.
    fn entries(&mut self, sim: &mut Simulator) -> Result<()> {
        loop {
            match self.peek() {
                Some(b'[') => {
                    let (name, ctime, mtime, mode) = self.record_header(b'[', b']')?;
                    sim.raw_begin_folder(&name, ctime, mtime, mode)?;
                    self.expect(b'{')?;
                    self.entries(sim)?;
                    self.expect(b'}')?;
                    sim.raw_end_folder();
                }
                Some(b'(') => {
                    let (name, ctime, mtime, mode) = self.record_header(b'(', b')')?;
                    let content = self.content()?;
                    sim.raw_add_file(&name, ctime, mtime, mode, &content)?;
                }
                Some(b'}') => return Ok(()),
                Some(byte) => {
                    return self.err(format!(
                        "unexpected {:?} where an entry should start",
                        byte as char
                    ))
                }
                None => return self.err("end of input inside a folder record"),
            }
        }
    }
}
