//! Byte strings known to hold only ASCII, so they can be viewed as `str` without re-checking.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidAsciiError;

impl fmt::Display for InvalidAsciiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid ascii")
    }
}

impl std::error::Error for InvalidAsciiError {}

/// An owned [`AsciiStr`]
#[derive(PartialEq, Eq, Hash)]
pub struct AsciiString(Box<AsciiStr>);

impl Clone for AsciiString {
    fn clone(&self) -> Self {
        self.0.to_ascii_string()
    }
}

impl std::ops::Deref for AsciiString {
    type Target = AsciiStr;

    fn deref(&self) -> &AsciiStr {
        &self.0
    }
}

impl fmt::Debug for AsciiString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for AsciiString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[repr(transparent)]
#[derive(PartialEq, Eq, Hash)]
pub struct AsciiStr([u8]);

impl fmt::Debug for AsciiStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl AsciiStr {
    pub fn from_ascii(bytes: &[u8]) -> Result<&AsciiStr, InvalidAsciiError> {
        if !bytes.is_ascii() {
            return Err(InvalidAsciiError);
        }
        // SAFETY: AsciiStr is a transparent wrapper around [u8]
        Ok(unsafe { &*(bytes as *const [u8] as *const AsciiStr) })
    }

    pub fn to_ascii_string(&self) -> AsciiString {
        let bytes = Box::<[u8]>::from(&self.0);
        // SAFETY: same layout, and the contents are still ascii
        AsciiString(unsafe { Box::from_raw(Box::into_raw(bytes) as *mut AsciiStr) })
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: ascii is valid UTF-8
        unsafe { std::str::from_utf8_unchecked(&self.0) }
    }
}

pub trait AsAsciiStr {
    fn as_ascii_str(&self) -> Result<&AsciiStr, InvalidAsciiError>;
}

impl AsAsciiStr for str {
    fn as_ascii_str(&self) -> Result<&AsciiStr, InvalidAsciiError> {
        AsciiStr::from_ascii(self.as_bytes())
    }
}
