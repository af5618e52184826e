//! Parser for the lines of a job file.
use crate::protocol::MAX_STRING_SIZE;

/// These are the commands that can appear in a job file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `WRITE [(key,value)(key2,value2)]`
    Write(Vec<(String, String)>),
    /// `READ [key,key2]`
    Read(Vec<String>),
    /// `DELETE [key,key2]`
    Delete(Vec<String>),
    /// `SHOW`
    Show,
    /// `WAIT <delay_ms>`
    Wait(u64),
    /// `BACKUP`
    Backup,
    /// `HELP`
    Help,
    /// a blank line or a `#` comment
    Empty,
    /// a line that could not be parsed, along with the reason
    Invalid(String),
}

/// the usage listing written by the HELP command
pub const HELP_TEXT: &str = "Available commands:
  WRITE [(key,value)(key2,value2),...]
  READ [key,key2,...]
  DELETE [key,key2,...]
  SHOW
  WAIT <delay_ms>
  BACKUP
  HELP
";

/// parses one line of a job file
pub fn parse_line(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Command::Empty;
    }

    let (name, args) = match line.find(char::is_whitespace) {
        Some(pos) => (&line[..pos], line[pos..].trim()),
        None => (line, ""),
    };

    let parsed = match name {
        "WRITE" => parse_pairs(args).map(Command::Write),
        "READ" => parse_keys(args).map(Command::Read),
        "DELETE" => parse_keys(args).map(Command::Delete),
        "WAIT" => args
            .parse::<u64>()
            .map(Command::Wait)
            .map_err(|_| format!("invalid delay {:?}", args)),
        "SHOW" => no_args(args, Command::Show),
        "BACKUP" => no_args(args, Command::Backup),
        "HELP" => no_args(args, Command::Help),
        _ => Err(format!("unknown command {:?}", name)),
    };
    parsed.unwrap_or_else(Command::Invalid)
}

fn no_args(args: &str, command: Command) -> Result<Command, String> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(format!("unexpected arguments {:?}", args))
    }
}

// strips the surrounding brackets of a list argument
fn list_body(args: &str) -> Result<&str, String> {
    args.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| format!("expected a [...] list, got {:?}", args))
}

fn parse_keys(args: &str) -> Result<Vec<String>, String> {
    let body = list_body(args)?;
    let keys = body
        .split(',')
        .map(|key| token(key.trim()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(keys)
}

fn parse_pairs(args: &str) -> Result<Vec<(String, String)>, String> {
    let mut rest = list_body(args)?.trim();
    let mut pairs = Vec::new();
    while !rest.is_empty() {
        let inner_end = rest
            .find(')')
            .ok_or_else(|| format!("unterminated pair in {:?}", args))?;
        let pair = rest[..inner_end]
            .strip_prefix('(')
            .ok_or_else(|| format!("expected '(' in {:?}", args))?;
        let (key, value) = pair
            .split_once(',')
            .ok_or_else(|| format!("expected (key,value) in {:?}", args))?;
        pairs.push((token(key.trim())?, token(value.trim())?));
        // pairs may optionally be separated by commas
        rest = rest[inner_end + 1..].trim_start_matches(|c: char| c == ',' || c.is_whitespace());
    }
    if pairs.is_empty() {
        return Err("WRITE needs at least one pair".to_string());
    }
    Ok(pairs)
}

// a key or value: non-empty, at most MAX_STRING_SIZE bytes, free of list punctuation
fn token(raw: &str) -> Result<String, String> {
    if raw.is_empty() {
        return Err("empty key or value".to_string());
    }
    if raw.len() > MAX_STRING_SIZE {
        return Err(format!("{:?} is longer than {} bytes", raw, MAX_STRING_SIZE));
    }
    if raw
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | ','))
    {
        return Err(format!("{:?} contains a reserved character", raw));
    }
    Ok(raw.to_string())
}
