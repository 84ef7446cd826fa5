//! Line-oriented command interpreter
//!
//! Parses one command per line, dispatches to the simulator facade, and
//! renders listings. All output goes through the writer handed in, so the
//! interpreter is as testable as the core it drives.

use crate::config::SimConfig;
use crate::error::SimError;
use crate::save::{self, is_reserved};
use crate::simulator::{FolderListing, Simulator};
use crate::tree::{EntryKind, NodeId, NodeKind};
use chrono::{Local, LocalResult, TimeZone};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// A fully parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Tree,
    TreeAll,
    Pwd,
    Ls,
    Create(String),
    Write(String, Vec<u8>),
    Read(String),
    Mkdir(String),
    Delete(String),
    Deldir(String),
    Append(String, Vec<u8>),
    Cp(String, String),
    Rename(String, String),
    Chmod(String, u8),
    Cd(String),
    Export(String),
    Import(String),
    Exit,
}

/// Whether the interpreter loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Exit,
}

/// Parse one input line. `Ok(None)` for a blank line; `Err` carries the
/// message to show the user.
pub fn parse_line(line: &str) -> Result<Option<Command>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let verb = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("");

    let command = match verb {
        "tree" => Command::Tree,
        "treeall" => Command::TreeAll,
        "pwd" => Command::Pwd,
        "ls" => Command::Ls,
        "create" => Command::Create(take_name(rest)?.0),
        "read" => Command::Read(take_name(rest)?.0),
        "mkdir" => Command::Mkdir(take_name(rest)?.0),
        "delete" => Command::Delete(take_name(rest)?.0),
        "deldir" => Command::Deldir(take_name(rest)?.0),
        "cd" => Command::Cd(take_name(rest)?.0),
        "export" => Command::Export(take_name(rest)?.0),
        "import" => Command::Import(take_name(rest)?.0),
        "write" => {
            let (name, tail) = take_name(rest)?;
            Command::Write(name, take_data(tail)?)
        }
        "append" => {
            let (name, tail) = take_name(rest)?;
            Command::Append(name, take_data(tail)?)
        }
        "cp" => {
            let (src, tail) = take_name(rest)?;
            let (dst, _) = take_name(tail)?;
            Command::Cp(src, dst)
        }
        "rename" => {
            let (old, tail) = take_name(rest)?;
            let (new, _) = take_name(tail)?;
            Command::Rename(old, new)
        }
        "chmod" => {
            let (name, tail) = take_name(rest)?;
            Command::Chmod(name, take_bits(tail)?)
        }
        "exit" => Command::Exit,
        _ => return Err("Invalid operation.".to_string()),
    };
    Ok(Some(command))
}

/// Pop one whitespace-delimited name off the front of `rest`.
fn take_name(rest: &str) -> Result<(String, &str), String> {
    let rest = rest.trim_start();
    if rest.is_empty() {
        return Err("Invalid input: missing name.".to_string());
    }
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let (name, tail) = rest.split_at(end);
    if name.bytes().any(is_reserved) {
        return Err("Invalid input: name cannot contain ;[](){}\"\\".to_string());
    }
    Ok((name.to_string(), tail))
}

/// The rest of the line is the data argument; reserved bytes must be
/// escaped with `\`.
fn take_data(tail: &str) -> Result<Vec<u8>, String> {
    let raw = tail.trim_start();
    if raw.is_empty() {
        return Err("Invalid input: missing content.".to_string());
    }
    let mut out = Vec::with_capacity(raw.len());
    let mut bytes = raw.bytes();
    while let Some(byte) = bytes.next() {
        match byte {
            b'\\' => match bytes.next() {
                Some(escaped) => out.push(escaped),
                None => {
                    return Err("Invalid input: dangling escape at end of content.".to_string())
                }
            },
            _ if is_reserved(byte) => {
                return Err(
                    "Invalid input: content cannot contain an unescaped ;[](){}\"\\".to_string(),
                )
            }
            _ => out.push(byte),
        }
    }
    Ok(out)
}

fn take_bits(tail: &str) -> Result<u8, String> {
    let token = tail.trim();
    if token.is_empty() {
        return Err("Invalid input: missing permission bits.".to_string());
    }
    match u8::from_str_radix(token, 8) {
        Ok(bits) if bits <= 0o7 => Ok(bits),
        _ => Err("Invalid input: permission bits must be a single octal digit 0-7.".to_string()),
    }
}

/// Interpreter state: the live simulator and where saves go.
pub struct Shell {
    sim: Simulator,
    save_dir: PathBuf,
}

impl Shell {
    pub fn new(config: SimConfig, save_dir: impl Into<PathBuf>) -> Self {
        Shell {
            sim: Simulator::new(config),
            save_dir: save_dir.into(),
        }
    }

    pub fn simulator(&self) -> &Simulator {
        &self.sim
    }

    /// Parse and execute one line, writing all output to `out`.
    pub fn run_line(&mut self, line: &str, out: &mut impl Write) -> io::Result<Outcome> {
        match parse_line(line) {
            Ok(None) => Ok(Outcome::Continue),
            Err(msg) => {
                writeln!(out, "{}", msg)?;
                Ok(Outcome::Continue)
            }
            Ok(Some(command)) => self.execute(command, out),
        }
    }

    pub fn execute(&mut self, command: Command, out: &mut impl Write) -> io::Result<Outcome> {
        match command {
            Command::Tree => self.render_tree(self.sim.cwd_id(), out)?,
            Command::TreeAll => {
                self.render_pool(out)?;
                self.render_tree(self.sim.root_id(), out)?;
            }
            Command::Pwd => writeln!(out, "{}", self.sim.pwd())?,
            Command::Ls => match self.sim.ls() {
                Ok(listing) => render_ls(&listing, out)?,
                Err(e) => writeln!(out, "error: {}", e)?,
            },
            Command::Create(name) => {
                let result = self.sim.create(&name);
                report(result, out)?;
            }
            Command::Mkdir(name) => {
                let result = self.sim.mkdir(&name);
                report(result, out)?;
            }
            Command::Write(name, data) => {
                let result = self.sim.write(&name, &data);
                report(result, out)?;
            }
            Command::Append(name, data) => {
                let result = self.sim.append(&name, &data);
                report(result, out)?;
            }
            Command::Read(name) => match self.sim.read(&name) {
                Ok(bytes) => {
                    out.write_all(&bytes)?;
                    writeln!(out)?;
                }
                Err(e) => writeln!(out, "error: {}", e)?,
            },
            Command::Delete(name) => {
                let result = self.sim.delete(&name);
                let wrong_kind = matches!(&result, Err(SimError::TypeMismatch { .. }));
                report(result, out)?;
                if wrong_kind {
                    writeln!(out, "tip: use \"deldir {}\" instead.", name)?;
                }
            }
            Command::Deldir(name) => {
                let result = self.sim.deldir(&name);
                let wrong_kind = matches!(&result, Err(SimError::TypeMismatch { .. }));
                report(result, out)?;
                if wrong_kind {
                    writeln!(out, "tip: use \"delete {}\" instead.", name)?;
                }
            }
            Command::Cp(src, dst) => {
                let result = self.sim.cp(&src, &dst);
                report(result, out)?;
            }
            Command::Rename(old, new) => {
                let result = self.sim.rename(&old, &new);
                report(result, out)?;
            }
            Command::Chmod(name, bits) => {
                let result = self.sim.chmod(&name, bits);
                report(result, out)?;
            }
            Command::Cd(name) => {
                let result = self.sim.cd(&name);
                report(result, out)?;
            }
            Command::Export(tag) => self.export(&tag, out)?,
            Command::Import(tag) => self.import(&tag, out)?,
            Command::Exit => return Ok(Outcome::Exit),
        }
        Ok(Outcome::Continue)
    }

    fn save_path(&self, tag: &str) -> PathBuf {
        self.save_dir.join(format!("{}.simsave", tag))
    }

    fn export(&self, tag: &str, out: &mut impl Write) -> io::Result<()> {
        let path = self.save_path(tag);
        match export_to(&self.sim, &self.save_dir, &path) {
            Ok(()) => writeln!(out, "saved to {}", path.display()),
            Err(e) => writeln!(out, "error: {}", e),
        }
    }

    /// Stage the replacement simulator first; the live tree is only
    /// swapped out after a full parse.
    fn import(&mut self, tag: &str, out: &mut impl Write) -> io::Result<()> {
        let path = self.save_path(tag);
        let result = fs::read(&path)
            .map_err(SimError::from)
            .and_then(|bytes| save::import(&bytes, self.sim.config().clone()));
        match result {
            Ok(loaded) => {
                self.sim = loaded;
                writeln!(out, "imported {} (previous tree discarded)", path.display())
            }
            Err(e) => writeln!(out, "error: {} (current tree kept)", e),
        }
    }

    fn render_tree(&self, start: NodeId, out: &mut impl Write) -> io::Result<()> {
        self.render_tree_node(start, 0, out)
    }

    fn render_tree_node(
        &self,
        id: NodeId,
        depth: usize,
        out: &mut impl Write,
    ) -> io::Result<()> {
        writeln!(out, "{}/", self.sim.node(id).meta.name)?;
        for &child in self.sim.children_of(id) {
            for _ in 0..depth {
                write!(out, "|  ")?;
            }
            write!(out, "|--")?;
            match self.sim.node(child).kind {
                NodeKind::Folder { .. } => self.render_tree_node(child, depth + 1, out)?,
                NodeKind::File { .. } => writeln!(out, "{}", self.sim.node(child).meta.name)?,
            }
        }
        Ok(())
    }

    fn render_pool(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "Memory assignment:")?;
        for s in self.sim.pool().segments() {
            writeln!(
                out,
                "segment {}: [{}, {}], size: {}, status: {}",
                s.id,
                s.first,
                s.end,
                s.len(),
                s.state
            )?;
        }
        Ok(())
    }
}

fn export_to(sim: &Simulator, dir: &Path, path: &Path) -> crate::error::Result<()> {
    fs::create_dir_all(dir)?;
    let mut file = io::BufWriter::new(fs::File::create(path)?);
    save::export(sim, &mut file)?;
    file.flush()?;
    Ok(())
}

fn report(result: crate::error::Result<()>, out: &mut impl Write) -> io::Result<()> {
    match result {
        Ok(()) => writeln!(out, "success!"),
        Err(e) => writeln!(out, "error: {}", e),
    }
}

fn render_ls(listing: &FolderListing, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "Total size: {}", listing.total_size)?;
    for entry in &listing.entries {
        writeln!(
            out,
            "{}{}. {} ctime: {} | mtime: {}",
            match entry.kind {
                EntryKind::Folder => 'd',
                EntryKind::File => '-',
            },
            entry.mode,
            entry.name,
            fmt_time(entry.ctime),
            fmt_time(entry.mtime),
        )?;
    }
    Ok(())
}

fn fmt_time(t: i64) -> String {
    match Local.timestamp_opt(t, 0) {
        LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => t.to_string(),
    }
}
