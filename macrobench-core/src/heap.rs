//! Worker heap limits
//!
//! Sizes use the `<n>[k|m|g]` syntax (`256m`, `1g`, `65536`).

use thiserror::Error;

/// Rejected heap size.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid heap size '{0}', expected <n>[k|m|g]")]
pub struct HeapSizeError(pub String);

/// Parse a heap size into bytes.
pub fn parse_heap_size(text: &str) -> Result<u64, HeapSizeError> {
    let err = || HeapSizeError(text.to_string());
    let t = text.trim();
    let (digits, shift) = match t.as_bytes().last() {
        Some(b'k' | b'K') => (&t[..t.len() - 1], 10),
        Some(b'm' | b'M') => (&t[..t.len() - 1], 20),
        Some(b'g' | b'G') => (&t[..t.len() - 1], 30),
        Some(_) => (t, 0),
        None => return Err(err()),
    };
    let n: u64 = digits.parse().map_err(|_| err())?;
    if n == 0 {
        return Err(err());
    }
    n.checked_mul(1u64 << shift).ok_or_else(err)
}

/// Heap bounds a worker was launched with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapLimits {
    /// Initial heap, recorded only
    pub min: Option<String>,
    /// Applied as the data segment limit
    pub max: Option<String>,
}

impl HeapLimits {
    /// Same value for both bounds.
    pub fn fixed(size: &str) -> Self {
        Self {
            min: Some(size.to_string()),
            max: Some(size.to_string()),
        }
    }

    /// Launch flags for a worker.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(min) = &self.min {
            args.push(format!("--heap-min={min}"));
        }
        if let Some(max) = &self.max {
            args.push(format!("--heap-max={max}"));
        }
        args
    }

    /// Apply the maximum to the current process. Returns the applied limit.
    pub fn apply(&self) -> Result<Option<u64>, std::io::Error> {
        let Some(max) = &self.max else {
            return Ok(None);
        };
        let bytes = parse_heap_size(max)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        set_data_limit(bytes)?;
        tracing::debug!(bytes, "applied heap limit");
        Ok(Some(bytes))
    }
}

#[cfg(unix)]
fn set_data_limit(bytes: u64) -> Result<(), std::io::Error> {
    let limit = libc::rlimit {
        rlim_cur: bytes as libc::rlim_t,
        rlim_max: bytes as libc::rlim_t,
    };
    // SAFETY: setrlimit only reads the struct we pass.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_DATA, &limit) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn set_data_limit(_bytes: u64) -> Result<(), std::io::Error> {
    Ok(())
}
