use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use super::error::BinaryError;

/// Magic tag opening every binary object payload
pub const HEADER_MAGIC: u32 = 1;
/// Fixed size of the binary object header in bytes
pub const HEADER_SIZE: usize = 20;

/// Header framing every binary object response.
///
/// Layout on the wire, all fields little-endian u32:
/// magic, object version, required master version, uncompressed size
/// (0 when the payload is stored as-is) and stored payload length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryHeader {
    /// Version of the object carried in the payload
    pub version: i64,
    /// Minimum master (schema) version required to decode the payload
    pub master_version: i64,
    /// Uncompressed payload size; 0 means the payload is not compressed
    pub zipped: u32,
    /// Stored payload length in bytes
    pub payload: u32,
}

/// Split a binary response into its header and (inflated) payload.
///
/// The payload length is always validated against the header; a compressed
/// payload is additionally validated against the advertised uncompressed size.
pub fn unpack(data: &[u8]) -> Result<(BinaryHeader, Vec<u8>), BinaryError> {
    if data.len() < HEADER_SIZE {
        return Err(BinaryError::TooShort(data.len()));
    }

    let mut cursor = Cursor::new(&data[..HEADER_SIZE]);
    let magic = cursor.read_u32::<LittleEndian>()?;
    if magic != HEADER_MAGIC {
        return Err(BinaryError::BadMagic(magic));
    }
    let header = BinaryHeader {
        version: cursor.read_u32::<LittleEndian>()? as i64,
        master_version: cursor.read_u32::<LittleEndian>()? as i64,
        zipped: cursor.read_u32::<LittleEndian>()?,
        payload: cursor.read_u32::<LittleEndian>()?,
    };

    let body = &data[HEADER_SIZE..];

    // a header without payload is legal, e.g. the same-version short reply
    if header.payload == 0 {
        return Ok((header, Vec::new()));
    }

    if body.len() != header.payload as usize {
        return Err(BinaryError::LengthMismatch {
            got: body.len(),
            expected: header.payload as usize,
        });
    }

    if header.zipped == 0 {
        return Ok((header, body.to_vec()));
    }

    let mut inflated = Vec::with_capacity(header.zipped as usize);
    flate2::read::ZlibDecoder::new(body).read_to_end(&mut inflated)?;
    if inflated.len() != header.zipped as usize {
        return Err(BinaryError::InflateMismatch {
            got: inflated.len(),
            expected: header.zipped as usize,
        });
    }

    Ok((header, inflated))
}

/// Build a framed payload the way the server does. Test helper
#[cfg(test)]
pub(crate) fn pack(version: i64, master_version: i64, body: &[u8], compress: bool) -> Vec<u8> {
    use byteorder::WriteBytesExt;
    use std::io::Write;

    let (zipped, stored) = if compress {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(body).unwrap();
        (body.len() as u32, encoder.finish().unwrap())
    } else {
        (0, body.to_vec())
    };

    let mut out = Vec::with_capacity(HEADER_SIZE + stored.len());
    out.write_u32::<LittleEndian>(HEADER_MAGIC).unwrap();
    out.write_u32::<LittleEndian>(version as u32).unwrap();
    out.write_u32::<LittleEndian>(master_version as u32).unwrap();
    out.write_u32::<LittleEndian>(zipped).unwrap();
    out.write_u32::<LittleEndian>(stored.len() as u32).unwrap();
    out.extend_from_slice(&stored);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_plain() {
        let data = pack(12, 3, b"payload bytes", false);
        let (header, body) = unpack(&data).unwrap();
        assert_eq!(header.version, 12);
        assert_eq!(header.master_version, 3);
        assert_eq!(header.zipped, 0);
        assert_eq!(body, b"payload bytes");
    }

    #[test]
    fn test_unpack_zipped() {
        let body: Vec<u8> = std::iter::repeat(b"abcd".as_slice())
            .take(64)
            .flatten()
            .copied()
            .collect();
        let data = pack(5, 0, &body, true);
        let (header, inflated) = unpack(&data).unwrap();
        assert_eq!(header.version, 5);
        assert_eq!(header.zipped as usize, body.len());
        assert_eq!(inflated, body);
    }

    #[test]
    fn test_unpack_empty_payload() {
        let data = pack(9, 0, b"", false);
        let (header, body) = unpack(&data).unwrap();
        assert_eq!(header.version, 9);
        assert!(body.is_empty());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut data = pack(1, 0, b"x", false);
        data[0] = 0xff;
        match unpack(&data) {
            Err(BinaryError::BadMagic(_)) => (),
            _ => panic!(),
        }
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut data = pack(1, 0, b"four", false);
        data.push(0);
        match unpack(&data) {
            Err(BinaryError::LengthMismatch { .. }) => (),
            _ => panic!(),
        }
    }

    #[test]
    fn test_truncated_header_rejected() {
        match unpack(&[0u8; 10]) {
            Err(BinaryError::TooShort(10)) => (),
            _ => panic!(),
        }
    }
}
