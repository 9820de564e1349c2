//! Compact binary model format.
//!
//! Layout, all little-endian: the magic, `u32` order, `u32` vocabulary size,
//! then each word as `u32` byte length and UTF-8 bytes. Then for each order
//! `n`: a `u32` count followed by entries of `n` `u32` word IDs, an `f32`
//! log10 probability and an `f32` log10 backoff. Scores are stored in log10
//! so a model can be reloaded under any log base.

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{NGramError, NGramModel, WordId};
use crate::logmath::LogMath;

pub const MAGIC: [u8; 8] = *b"SPXNGRM1";

const MAX_ORDER: u32 = 16;

pub(crate) fn read(
    path: &Path,
    lmath: Arc<LogMath>,
    whole_file: bool,
) -> Result<NGramModel, NGramError> {
    if whole_file {
        let bytes = std::fs::read(path).map_err(|e| NGramError::io(path, e))?;
        read_from(Cursor::new(bytes), path, lmath)
    } else {
        let file = File::open(path).map_err(|e| NGramError::io(path, e))?;
        read_from(BufReader::new(file), path, lmath)
    }
}

fn read_from<R: Read>(
    mut r: R,
    path: &Path,
    lmath: Arc<LogMath>,
) -> Result<NGramModel, NGramError> {
    let io_err = |e| NGramError::io(path, e);
    let malformed = |reason: &str| NGramError::Parse {
        path: path.display().to_string(),
        line: 0,
        reason: reason.to_string(),
    };

    let mut magic = [0u8; MAGIC.len()];
    r.read_exact(&mut magic).map_err(io_err)?;
    if magic != MAGIC {
        return Err(NGramError::UnknownFormat(path.display().to_string()));
    }

    let order = r.read_u32::<LittleEndian>().map_err(io_err)?;
    if order == 0 || order > MAX_ORDER {
        return Err(malformed("unsupported model order"));
    }
    let mut model = NGramModel::new(lmath.clone(), order as usize);

    let n_words = r.read_u32::<LittleEndian>().map_err(io_err)?;
    let mut buf = Vec::new();
    for _ in 0..n_words {
        let len = r.read_u32::<LittleEndian>().map_err(io_err)? as usize;
        buf.resize(len, 0);
        r.read_exact(&mut buf).map_err(io_err)?;
        let word = std::str::from_utf8(&buf).map_err(|_| malformed("word is not UTF-8"))?;
        model.push_word(word);
    }
    if model.vocab_len() != n_words as usize {
        return Err(malformed("duplicate vocabulary entries"));
    }

    let to_log = |v: f32| -> i32 {
        if v <= -99.0 {
            lmath.zero()
        } else {
            lmath.log10_to_log(v as f64)
        }
    };
    let mut ids: Vec<WordId> = Vec::with_capacity(order as usize);
    for n in 1..=order as usize {
        let count = r.read_u32::<LittleEndian>().map_err(io_err)?;
        for _ in 0..count {
            ids.clear();
            for _ in 0..n {
                let id = r.read_u32::<LittleEndian>().map_err(io_err)?;
                if id >= n_words {
                    return Err(malformed("word ID out of range"));
                }
                ids.push(WordId(id));
            }
            let prob = r.read_f32::<LittleEndian>().map_err(io_err)?;
            let backoff = r.read_f32::<LittleEndian>().map_err(io_err)?;
            let backoff = if backoff == 0.0 { 0 } else { to_log(backoff) };
            model.insert_gram(&ids, to_log(prob), backoff);
        }
    }
    Ok(model)
}

pub(crate) fn write(model: &NGramModel, path: &Path) -> Result<(), NGramError> {
    let io_err = |e| NGramError::io(path, e);
    let mut out = BufWriter::new(File::create(path).map_err(io_err)?);
    let lmath = &model.lmath;
    let log10 = |p: i32| -> f32 {
        if p <= lmath.zero() {
            -99.0
        } else {
            lmath.log_to_log10(p) as f32
        }
    };

    out.write_all(&MAGIC).map_err(io_err)?;
    out.write_u32::<LittleEndian>(model.order as u32).map_err(io_err)?;
    out.write_u32::<LittleEndian>(model.vocab.len() as u32).map_err(io_err)?;
    for word in &model.vocab {
        out.write_u32::<LittleEndian>(word.len() as u32).map_err(io_err)?;
        out.write_all(word.as_bytes()).map_err(io_err)?;
    }
    for grams in &model.grams {
        let mut keys: Vec<&Box<[WordId]>> = grams.keys().collect();
        keys.sort();
        out.write_u32::<LittleEndian>(keys.len() as u32).map_err(io_err)?;
        for key in keys {
            let entry = grams[key];
            for id in key.iter() {
                out.write_u32::<LittleEndian>(id.0).map_err(io_err)?;
            }
            out.write_f32::<LittleEndian>(log10(entry.prob)).map_err(io_err)?;
            let backoff = if entry.backoff == 0 { 0.0 } else { log10(entry.backoff) };
            out.write_f32::<LittleEndian>(backoff).map_err(io_err)?;
        }
    }
    out.flush().map_err(io_err)?;
    log::info!("Wrote binary model to {}", path.display());
    Ok(())
}
