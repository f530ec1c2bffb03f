// ============================================================
// Layer 4: Kaldi Matrix Reader
// ============================================================
// Reads binary feature matrices out of Kaldi `ark` archives.
// A location `path.ark:offset` points just past the utterance key:
//
//   "\0B"                       binary marker
//   "FM " | "DM "               f32 / f64 matrix token
//   0x04 <i32 LE rows>
//   0x04 <i32 LE cols>
//   rows * cols values, row-major, little endian
//
// Compressed matrices ("CM", "CM2", "CM3") are not supported.
// An `scp` file maps utterance keys to such locations, one
// `key path.ark:offset` pair per line.

use anyhow::{bail, ensure, Context, Result};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Byte position of one matrix inside an ark file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArkLocation {
    pub path:   PathBuf,
    pub offset: u64,
}

impl FromStr for ArkLocation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (path, offset) = s
            .rsplit_once(':')
            .with_context(|| format!("'{s}' is not of the form path:offset"))?;
        ensure!(!path.is_empty(), "'{s}' has an empty ark path");
        let offset = offset
            .trim()
            .parse::<u64>()
            .with_context(|| format!("'{s}' has an invalid byte offset"))?;
        Ok(Self { path: PathBuf::from(path), offset })
    }
}

impl std::fmt::Display for ArkLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.path.display(), self.offset)
    }
}

/// A dense row-major feature matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct KaldiMatrix {
    pub rows:   usize,
    pub cols:   usize,
    pub values: Vec<f32>,
}

/// Read the binary matrix stored at `loc`.
pub fn read_matrix(loc: &ArkLocation) -> Result<KaldiMatrix> {
    let file = File::open(&loc.path)
        .with_context(|| format!("Cannot open ark file '{}'", loc.path.display()))?;
    let mut reader = BufReader::new(file);
    reader
        .seek(SeekFrom::Start(loc.offset))
        .with_context(|| format!("Cannot seek to {loc}"))?;

    read_matrix_from(&mut reader).with_context(|| format!("Malformed matrix at {loc}"))
}

fn read_matrix_from<R: Read>(reader: &mut R) -> Result<KaldiMatrix> {
    let mut marker = [0u8; 2];
    reader.read_exact(&mut marker)?;
    ensure!(marker == *b"\0B", "expected binary marker, found {marker:?}");

    let token = read_token(reader)?;
    let double = match token.as_str() {
        "FM" => false,
        "DM" => true,
        "CM" | "CM2" | "CM3" => bail!("compressed matrix '{token}' is not supported"),
        other => bail!("unexpected matrix token '{other}'"),
    };

    let rows = read_dim(reader)?;
    let cols = read_dim(reader)?;
    let count = rows
        .checked_mul(cols)
        .context("matrix dimensions overflow")?;

    let values = if double {
        let mut bytes = vec![0u8; count * 8];
        reader.read_exact(&mut bytes)?;
        bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32)
            .collect()
    } else {
        let mut bytes = vec![0u8; count * 4];
        reader.read_exact(&mut bytes)?;
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    };

    Ok(KaldiMatrix { rows, cols, values })
}

/// Read a space-terminated token such as "FM ".
fn read_token<R: Read>(reader: &mut R) -> Result<String> {
    let mut token = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        if byte[0] == b' ' {
            break;
        }
        token.push(byte[0]);
        ensure!(token.len() <= 8, "matrix token is too long");
    }
    Ok(String::from_utf8_lossy(&token).into_owned())
}

fn read_dim<R: Read>(reader: &mut R) -> Result<usize> {
    let mut size = [0u8; 1];
    reader.read_exact(&mut size)?;
    ensure!(size[0] == 4, "expected a 4-byte integer, size byte was {}", size[0]);

    let mut raw = [0u8; 4];
    reader.read_exact(&mut raw)?;
    let value = i32::from_le_bytes(raw);
    ensure!(value >= 0, "negative matrix dimension {value}");
    Ok(value as usize)
}

/// Parse a Kaldi `scp` index into key → location.
pub fn read_scp(path: impl AsRef<Path>) -> Result<HashMap<String, ArkLocation>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read scp file '{}'", path.display()))?;

    let mut index = HashMap::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, loc) = line
            .split_once(char::is_whitespace)
            .with_context(|| format!("{}:{}: expected 'key path:offset'", path.display(), lineno + 1))?;
        let loc: ArkLocation = loc
            .trim()
            .parse()
            .with_context(|| format!("{}:{}", path.display(), lineno + 1))?;
        index.insert(key.to_string(), loc);
    }

    tracing::debug!("Read {} entries from scp '{}'", index.len(), path.display());
    Ok(index)
}
