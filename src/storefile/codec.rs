use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::io;
use std::io::{Read, Write};

/// Byte representation:
///
/// ```text
/// +-------+-----+----------------+-------------+----------------------------------------+
/// | Magic | Vrs | Seq (8 bytes)  | Count (4)   | Records (Count times)             ...  |
/// +-------+-----+----------------+-------------+----------------------------------------+
///
/// Record: | key_len u32 | key | value_len u32 | value |
/// ```
///
/// All integers are little endian. Records are sorted by key and keys are unique within a file.
pub(super) const STORE_FILE_MAGIC: u32 = 0x5346_494C;
pub(super) const STORE_FILE_FORMAT_VERSION: u8 = 1;
/// Keys are allocated up front while indexing, so their length is capped.
pub(super) const MAX_KEY_LEN: u32 = 64 * 1024;

pub(super) struct Header {
    pub(super) sequence_id: u64,
    pub(super) entry_count: u32,
}

/// Location of a value inside the file, so lookups can seek straight to it.
#[derive(Copy, Clone, Debug)]
pub(super) struct ValuePosition {
    pub(super) offset: u64,
    pub(super) len: u32,
}

pub(super) fn write_store_file<W: Write>(w: &mut W, sequence_id: u64, entries: &[(Bytes, Bytes)]) -> io::Result<()> {
    w.write_u32::<LittleEndian>(STORE_FILE_MAGIC)?;
    w.write_u8(STORE_FILE_FORMAT_VERSION)?;
    w.write_u64::<LittleEndian>(sequence_id)?;
    w.write_u32::<LittleEndian>(encoded_len(entries.len(), "entry count")?)?;

    for (key, value) in entries {
        let key_len = encoded_len(key.len(), "key length")?;
        if key_len > MAX_KEY_LEN {
            return Err(invalid_data(format!("key length {} exceeds {}", key_len, MAX_KEY_LEN)));
        }
        w.write_u32::<LittleEndian>(key_len)?;
        w.write_all(key)?;
        w.write_u32::<LittleEndian>(encoded_len(value.len(), "value length")?)?;
        w.write_all(value)?;
    }

    Ok(())
}

pub(super) fn read_header<R: Read>(r: &mut R) -> io::Result<Header> {
    let magic = r.read_u32::<LittleEndian>()?;
    if magic != STORE_FILE_MAGIC {
        return Err(invalid_data(format!("invalid store file magic: {:x}", magic)));
    }
    let version = r.read_u8()?;
    if version != STORE_FILE_FORMAT_VERSION {
        return Err(invalid_data(format!("unsupported store file version: {}", version)));
    }
    let sequence_id = r.read_u64::<LittleEndian>()?;
    let entry_count = r.read_u32::<LittleEndian>()?;

    Ok(Header {
        sequence_id,
        entry_count,
    })
}

/// Scans every record after the header and returns the key index. Values are skipped, not read.
pub(super) fn read_index<R: Read>(r: &mut R, header: &Header) -> io::Result<BTreeMap<Bytes, ValuePosition>> {
    // magic + version + seq + count
    let mut offset: u64 = 4 + 1 + 8 + 4;
    let mut index = BTreeMap::new();

    for _ in 0..header.entry_count {
        let key_len = r.read_u32::<LittleEndian>()?;
        if key_len > MAX_KEY_LEN {
            return Err(invalid_data(format!("key length {} exceeds {}", key_len, MAX_KEY_LEN)));
        }
        let mut key = vec![0u8; key_len as usize];
        r.read_exact(&mut key)?;
        let value_len = r.read_u32::<LittleEndian>()?;
        offset += 4 + key_len as u64 + 4;

        let skipped = io::copy(&mut r.by_ref().take(value_len as u64), &mut io::sink())?;
        if skipped != value_len as u64 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "store file value truncated"));
        }
        index.insert(
            Bytes::from(key),
            ValuePosition {
                offset,
                len: value_len,
            },
        );
        offset += value_len as u64;
    }

    Ok(index)
}

fn encoded_len(len: usize, what: &str) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| invalid_data(format!("{} {} does not fit in u32", what, len)))
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
