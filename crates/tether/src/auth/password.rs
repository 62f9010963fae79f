//! Keystore passwords.
//!
//! Generated passwords are `PASSWORD_LEN` characters drawn uniformly from the
//! printable ASCII range `!`..=`~`. A password is scrubbed (overwritten with
//! zeros, length preserved) by whoever consumes it, and zeroized on drop.

use std::fmt;
use std::io::BufRead;
use std::path::Path;

use rand::rngs::OsRng;
use rand::Rng;
use zeroize::Zeroize;

use super::Error;
use super::Result;

pub const PASSWORD_LEN: usize = 32;

/// Path that means "read the password from standard input".
pub const STDIN_PATH: &str = "/dev/stdin";

const FIRST: u8 = b'!';
const LAST: u8 = b'~';

pub struct Password {
    bytes: Vec<u8>,
}

impl Password {
    pub fn generate() -> Self {
        let mut rng = OsRng;
        let bytes = (0..PASSWORD_LEN).map(|_| rng.gen_range(FIRST..=LAST)).collect();
        Self { bytes }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Reads a password from the first line of `path`, or of stdin when the
    /// path is `/dev/stdin`.
    pub fn read_from(path: &Path) -> Result<Self> {
        let mut line = String::new();
        if path == Path::new(STDIN_PATH) {
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .map_err(|e| Error::Password(format!("reading stdin: {}", e)))?;
        } else {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| Error::Password(format!("reading {}: {}", path.display(), e)))?;
            line = contents.lines().next().unwrap_or_default().to_string();
            let mut contents = contents;
            contents.zeroize();
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).as_bytes().to_vec();
        line.zeroize();
        if trimmed.is_empty() {
            return Err(Error::Password("empty password".into()));
        }
        Ok(Self { bytes: trimmed })
    }

    /// Writes the password followed by a newline.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut buf = self.bytes.clone();
        buf.push(b'\n');
        let written = std::fs::write(path, &buf);
        buf.zeroize();
        written.map_err(|e| Error::Password(format!("writing {}: {}", path.display(), e)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Overwrites the buffer with zeros in place.
    pub fn scrub(&mut self) {
        self.bytes.as_mut_slice().zeroize();
    }

    pub fn is_scrubbed(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }
}

impl Drop for Password {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Password(<{} bytes>)", self.bytes.len())
    }
}
