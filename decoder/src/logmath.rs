//! Integer log-domain probability arithmetic.
//!
//! Probabilities are held as integer logarithms in a base `B = 1 + epsilon`
//! so that products become sums and nothing underflows. Sums of
//! probabilities need `log_B(B^x + B^y)`, which is computed as
//! `max(x, y) + table[|x - y|]` with `table[n] = log_B(1 + B^-n)`.
//! The table is derived from the base and a bit shift alone.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

pub const DEFAULT_LOG_BASE: f64 = 1.0001;

const TABLE_MAGIC: u32 = 0x1122_3344;
const MAX_SHIFT: u32 = 16;

#[derive(Error, Debug)]
pub enum LogMathError {
    #[error("Invalid log base {0}: must be greater than 1")]
    InvalidBase(f64),
    #[error("Invalid table shift {0}: must be at most 16")]
    InvalidShift(u32),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed log table {path}: {reason}")]
    Format { path: String, reason: String },
}

impl LogMathError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidBase(_) | Self::InvalidShift(_) => {
                "The log base settings are invalid. Check the logbase option."
            }
            Self::Io(_) => "Could not read or write the log table file.",
            Self::Format { .. } => "The log table file is corrupted or not a log table.",
        }
    }
}

/// Size, entry width in bytes and shift of an add table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableShape {
    pub size: usize,
    pub width: u32,
    pub shift: u32,
}

#[derive(Debug, Clone, PartialEq)]
enum AddTable {
    Narrow(Vec<u8>),
    Medium(Vec<u16>),
    Wide(Vec<u32>),
}

impl AddTable {
    fn from_values(values: Vec<u32>, width: u32) -> Self {
        match width {
            1 => Self::Narrow(values.into_iter().map(|v| v as u8).collect()),
            2 => Self::Medium(values.into_iter().map(|v| v as u16).collect()),
            _ => Self::Wide(values),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Narrow(t) => t.len(),
            Self::Medium(t) => t.len(),
            Self::Wide(t) => t.len(),
        }
    }

    fn width(&self) -> u32 {
        match self {
            Self::Narrow(_) => 1,
            Self::Medium(_) => 2,
            Self::Wide(_) => 4,
        }
    }

    #[inline]
    fn get(&self, d: usize) -> i32 {
        match self {
            Self::Narrow(t) => t[d] as i32,
            Self::Medium(t) => t[d] as i32,
            Self::Wide(t) => t[d] as i32,
        }
    }
}

/// Log-domain arithmetic for one base. Values produced by one instance are
/// only meaningful to the same instance; share it as `Arc<LogMath>`.
#[derive(Debug, Clone)]
pub struct LogMath {
    base: f64,
    log_of_base: f64,
    log10_of_base: f64,
    inv_log_of_base: f64,
    inv_log10_of_base: f64,
    shift: u32,
    zero: i32,
    table: Option<AddTable>,
}

impl Default for LogMath {
    fn default() -> Self {
        Self::build(DEFAULT_LOG_BASE, 0, true)
    }
}

impl LogMath {
    pub fn new(base: f64, shift: u32, use_table: bool) -> Result<Self, LogMathError> {
        if !(base > 1.0) || !base.is_finite() {
            return Err(LogMathError::InvalidBase(base));
        }
        if shift > MAX_SHIFT {
            return Err(LogMathError::InvalidShift(shift));
        }
        Ok(Self::build(base, shift, use_table))
    }

    fn build(base: f64, shift: u32, use_table: bool) -> Self {
        let log_of_base = base.ln();
        let log10_of_base = base.log10();
        let mut lmath = Self {
            base,
            log_of_base,
            log10_of_base,
            inv_log_of_base: 1.0 / log_of_base,
            inv_log10_of_base: 1.0 / log10_of_base,
            shift,
            // Leaves headroom so that sums of a few zeros do not wrap.
            zero: i32::MIN >> (shift + 2),
            table: None,
        };
        if use_table {
            lmath.table = Some(lmath.build_table());
        }
        lmath
    }

    fn add_table_entry(&self, byx: f64) -> i32 {
        let rounding = 0.5 * (1u64 << self.shift) as f64;
        let lobyx = (1.0 + byx).ln() * self.inv_log_of_base;
        ((lobyx + rounding) as i32) >> self.shift
    }

    fn build_table(&self) -> AddTable {
        let maxyx = ((2f64.ln() / self.log_of_base + 0.5) as u32) >> self.shift;
        let width = if maxyx < 256 {
            1
        } else if maxyx < 65536 {
            2
        } else {
            4
        };

        let mut byx = 1.0f64;
        let mut steps: u32 = 0;
        while self.add_table_entry(byx) > 0 {
            byx /= self.base;
            steps += 1;
        }
        let size = ((steps >> self.shift).max(255) + 1) as usize;

        let mut values = vec![0u32; size];
        byx = 1.0;
        let mut i: u32 = 0;
        loop {
            let k = self.add_table_entry(byx);
            let idx = (i >> self.shift) as usize;
            // With a shift several distances share a slot; keep the first (largest).
            if idx < size && values[idx] == 0 && k > 0 {
                values[idx] = k as u32;
            }
            if k <= 0 {
                break;
            }
            byx /= self.base;
            i += 1;
        }

        log::debug!(
            "Log add table: base={} shift={} size={} width={}",
            self.base,
            self.shift,
            size,
            width
        );
        AddTable::from_values(values, width)
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    /// Smallest representable value; stands in for probability zero.
    pub fn zero(&self) -> i32 {
        self.zero
    }

    pub fn width(&self) -> u32 {
        self.table.as_ref().map(AddTable::width).unwrap_or(0)
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    pub fn table_shape(&self) -> Option<TableShape> {
        self.table.as_ref().map(|t| TableShape {
            size: t.len(),
            width: t.width(),
            shift: self.shift,
        })
    }

    /// `log_B(B^p + B^q)` using the add table.
    #[inline]
    pub fn add(&self, p: i32, q: i32) -> i32 {
        if p <= self.zero {
            return q;
        }
        if q <= self.zero {
            return p;
        }
        let Some(table) = &self.table else {
            return self.add_exact(p, q);
        };
        let (d, r) = if p > q {
            (p as i64 - q as i64, p)
        } else {
            (q as i64 - p as i64, q)
        };
        if d as u64 >= table.len() as u64 {
            return r;
        }
        r + table.get(d as usize)
    }

    /// Same as [`LogMath::add`] but computed in floating point.
    pub fn add_exact(&self, p: i32, q: i32) -> i32 {
        self.log(self.exp(p) + self.exp(q))
    }

    pub fn log(&self, p: f64) -> i32 {
        if p <= 0.0 {
            return self.zero;
        }
        self.ln_to_log(p.ln())
    }

    pub fn exp(&self, p: i32) -> f64 {
        self.base.powf(((p as i64) << self.shift) as f64)
    }

    pub fn ln_to_log(&self, ln: f64) -> i32 {
        let v = (ln * self.inv_log_of_base) as i32 >> self.shift;
        v.max(self.zero)
    }

    pub fn log_to_ln(&self, p: i32) -> f64 {
        ((p as i64) << self.shift) as f64 * self.log_of_base
    }

    pub fn log10_to_log(&self, log10: f64) -> i32 {
        let v = (log10 * self.inv_log10_of_base) as i32 >> self.shift;
        v.max(self.zero)
    }

    pub fn log_to_log10(&self, p: i32) -> f64 {
        ((p as i64) << self.shift) as f64 * self.log10_of_base
    }

    pub fn log10_to_log_float(&self, log10: f64) -> f32 {
        let scaled = log10 * self.inv_log10_of_base;
        (scaled / (1u64 << self.shift) as f64) as f32
    }

    pub fn log_float_to_log10(&self, p: f32) -> f64 {
        p as f64 * self.log10_of_base * (1u64 << self.shift) as f64
    }

    /// Dumps the add table: a short text header followed by the table
    /// entries in little-endian order.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), LogMathError> {
        let path = path.as_ref();
        let shape = self.table_shape().ok_or_else(|| LogMathError::Format {
            path: path.display().to_string(),
            reason: "no add table to write".to_string(),
        })?;
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "s3")?;
        writeln!(out, "version 1.0")?;
        writeln!(out, "chksum0 no")?;
        writeln!(out, "width {}", shape.width)?;
        writeln!(out, "shift {}", shape.shift)?;
        writeln!(out, "logbase {}", self.base)?;
        writeln!(out, "endhdr")?;
        out.write_u32::<LittleEndian>(TABLE_MAGIC)?;
        out.write_u32::<LittleEndian>(shape.size as u32)?;
        match &self.table {
            Some(AddTable::Narrow(t)) => out.write_all(t)?,
            Some(AddTable::Medium(t)) => {
                for v in t {
                    out.write_u16::<LittleEndian>(*v)?;
                }
            }
            Some(AddTable::Wide(t)) => {
                for v in t {
                    out.write_u32::<LittleEndian>(*v)?;
                }
            }
            None => {}
        }
        out.flush()?;
        log::info!("Wrote log table ({} entries) to {}", shape.size, path.display());
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, LogMathError> {
        let path = path.as_ref();
        let malformed = |reason: &str| LogMathError::Format {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };

        let mut reader = BufReader::new(File::open(path)?);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        if line.trim() != "s3" {
            return Err(malformed("missing s3 header"));
        }

        let (mut width, mut shift, mut base) = (None, None, None);
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Err(malformed("header not terminated"));
            }
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("endhdr"), _) => break,
                (Some("width"), Some(v)) => width = v.parse::<u32>().ok(),
                (Some("shift"), Some(v)) => shift = v.parse::<u32>().ok(),
                (Some("logbase"), Some(v)) => base = v.parse::<f64>().ok(),
                _ => {}
            }
        }

        let width = width.ok_or_else(|| malformed("missing width"))?;
        let shift = shift.ok_or_else(|| malformed("missing shift"))?;
        let base = base.ok_or_else(|| malformed("missing logbase"))?;
        if !matches!(width, 1 | 2 | 4) {
            return Err(malformed("unsupported table width"));
        }

        if reader.read_u32::<LittleEndian>()? != TABLE_MAGIC {
            return Err(malformed("bad byte order marker"));
        }
        let size = reader.read_u32::<LittleEndian>()? as usize;
        let mut values = Vec::with_capacity(size);
        for _ in 0..size {
            let v = match width {
                1 => reader.read_u8()? as u32,
                2 => reader.read_u16::<LittleEndian>()? as u32,
                _ => reader.read_u32::<LittleEndian>()?,
            };
            values.push(v);
        }
        let mut trailing = Vec::new();
        reader.read_to_end(&mut trailing)?;
        if !trailing.is_empty() {
            return Err(malformed("trailing data after table"));
        }

        let mut lmath = Self::new(base, shift, false)?;
        lmath.table = Some(AddTable::from_values(values, width));
        log::info!("Read log table ({} entries) from {}", size, path.display());
        Ok(lmath)
    }
}
