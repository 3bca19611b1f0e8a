use core::fmt;

/// Renders a byte slice as lowercase hex. Used to put digests into log
/// lines without allocating.
pub struct HexSlice<'a> {
    bytes: &'a [u8],
    limit: Option<usize>,
}

impl<'a> HexSlice<'a> {
    fn new<T>(data: &'a T) -> HexSlice<'a>
    where
        T: ?Sized + AsRef<[u8]> + 'a,
    {
        HexSlice {
            bytes: data.as_ref(),
            limit: None,
        }
    }

    /// Only render the first `n` bytes, followed by an ellipsis if the
    /// slice was cut.
    pub fn short(self, n: usize) -> Self {
        Self {
            limit: Some(n),
            ..self
        }
    }
}

impl fmt::Display for HexSlice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = match self.limit {
            Some(n) if n < self.bytes.len() => &self.bytes[..n],
            _ => self.bytes,
        };
        for byte in shown {
            write!(f, "{:02x}", byte)?;
        }
        if shown.len() < self.bytes.len() {
            write!(f, "…")?;
        }
        Ok(())
    }
}

impl fmt::Debug for HexSlice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

pub trait HexDisplayExt {
    fn hex(&self) -> HexSlice<'_>;
}

impl<T> HexDisplayExt for T
where
    T: ?Sized + AsRef<[u8]>,
{
    fn hex(&self) -> HexSlice<'_> {
        HexSlice::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_every_byte() {
        let bytes = [0x0au8, 0xff, 0x00];
        assert_eq!(bytes.hex().to_string(), "0aff00");
    }

    #[test]
    fn short_cuts_long_slices() {
        let bytes = [0xabu8; 32];
        assert_eq!(bytes.hex().short(2).to_string(), "abab…");
        assert_eq!(bytes[..2].hex().short(4).to_string(), "abab");
    }
}
